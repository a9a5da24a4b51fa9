//! Requests and responses
//!
//! A [`Request`] carries the header of an inbound call, its payload and
//! the response being built for it. Request and response share the
//! payload buffer: handlers replace `data` with their response payload.

use crate::opcode::Opcode;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use vdisk_common::{Epoch, Node, ObjectDigest, ObjectId, ResultCode, VdiId};

/// Payload is written by the request (cache purge: delete one VDI)
pub const FLAG_CMD_WRITE: u16 = 0x01;
/// Create seeds the object from `obj.cow_oid`
pub const FLAG_CMD_COW: u16 = 0x02;
/// Create the attribute if it does not exist
pub const FLAG_CMD_CREAT: u16 = 0x04;
/// With [`FLAG_CMD_CREAT`], fail if the attribute exists
pub const FLAG_CMD_EXCL: u16 = 0x08;
/// Delete the attribute
pub const FLAG_CMD_DEL: u16 = 0x10;

/// Object addressing fields
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjParams {
    pub oid: ObjectId,
    pub cow_oid: ObjectId,
    pub offset: u64,
    /// Epoch the request is about (GET_EPOCH, GET_HASH, recovery)
    pub tgt_epoch: Epoch,
    pub copies: u8,
    pub copy_policy: u8,
}

/// VDI fields
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdiParams {
    /// Target of VDI I/O and NOTIFY_VDI_ADD
    pub vdi_id: VdiId,
    pub base_vdi_id: VdiId,
    pub vdi_size: u64,
    /// Non-zero asks NEW_VDI for a snapshot, or selects a snapshot in lookups
    pub snap_id: u32,
    pub copies: u8,
    pub copy_policy: u8,
    /// 0 selects the cluster default
    pub block_size_shift: u8,
}

/// Cluster-wide parameters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub copies: u8,
    pub copy_policy: u8,
    pub flags: u16,
    /// Format time, seconds since the epoch
    pub ctime: u64,
}

/// Header of an inbound request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub opcode: u8,
    pub flags: u16,
    /// Membership epoch of the sender
    pub epoch: Epoch,
    /// Length of the payload, or of the expected response for reads
    pub data_length: u32,
    pub obj: ObjParams,
    pub vdi: VdiParams,
    pub cluster: ClusterParams,
}

impl RequestHeader {
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode: opcode.code(),
            flags: 0,
            epoch: 0,
            data_length: 0,
            obj: ObjParams::default(),
            vdi: VdiParams::default(),
            cluster: ClusterParams::default(),
        }
    }
}

/// Copies and policy a VDI operation resolved to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdiResponse {
    pub vdi_id: VdiId,
    pub copies: u8,
    /// Attribute a GET_VDI_ATTR resolved to
    pub attr_id: u32,
}

/// Store space of the responding node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpace {
    pub store_size: u64,
    pub store_free: u64,
}

/// Defaults applied to new VDIs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefault {
    pub nr_copies: u8,
    pub copy_policy: u8,
    pub block_size_shift: u8,
}

/// Response being built for a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub result: ResultCode,
    pub epoch: Epoch,
    pub data_length: u32,
    pub vdi: VdiResponse,
    pub node: NodeSpace,
    pub hash: Option<ObjectDigest>,
    pub cluster_default: ClusterDefault,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            result: ResultCode::Success,
            epoch: 0,
            data_length: 0,
            vdi: VdiResponse::default(),
            node: NodeSpace::default(),
            hash: None,
            cluster_default: ClusterDefault::default(),
        }
    }
}

/// One inbound call
#[derive(Clone, Debug)]
pub struct Request {
    pub header: RequestHeader,
    pub response: ResponseHeader,
    pub data: BytesMut,
    /// Node the request came from
    pub sender: Node,
}

impl Request {
    /// Empty request for `opcode` from `sender`
    #[must_use]
    pub fn new(opcode: Opcode, sender: Node) -> Self {
        Self {
            header: RequestHeader::new(opcode),
            response: ResponseHeader::default(),
            data: BytesMut::new(),
            sender,
        }
    }

    /// Attach a payload, setting the header length
    #[must_use]
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = BytesMut::from(data);
        self.header.data_length = data.len() as u32;
        self
    }

    /// Replace the payload with a response payload
    pub fn set_response_data(&mut self, data: &[u8]) {
        self.data = BytesMut::from(data);
        self.response.data_length = data.len() as u32;
    }

    /// Response payload
    #[must_use]
    pub fn response_data(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data[..self.response.data_length as usize])
    }

    /// Opcode, if known
    pub fn opcode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.header.opcode)
    }

    /// Result code of the response
    #[must_use]
    pub const fn result(&self) -> ResultCode {
        self.response.result
    }

    /// Whether `flag` is set in the header
    #[must_use]
    pub const fn has_flag(&self, flag: u16) -> bool {
        self.header.flags & flag != 0
    }
}
