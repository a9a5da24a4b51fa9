//! Operation codes
//!
//! Client-visible operations use the low range, node-internal ones the
//! high range. Peer opcodes are only ever issued by gateways.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Code identifying an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    CreateAndWriteObj = 0x01,
    ReadObj = 0x02,
    WriteObj = 0x03,
    RemoveObj = 0x04,
    DiscardObj = 0x05,
    VdiRead = 0x06,
    VdiWrite = 0x07,

    NewVdi = 0x11,
    LockVdi = 0x12,
    ReleaseVdi = 0x13,
    GetVdiInfo = 0x14,
    ReadVdis = 0x15,
    FlushVdi = 0x16,
    DelVdi = 0x17,
    GetClusterDefault = 0x18,

    GetNodeList = 0x82,
    MakeFs = 0x84,
    Shutdown = 0x85,
    StatSheep = 0x86,
    StatCluster = 0x87,
    GetVdiAttr = 0x89,
    ForceRecover = 0x8a,
    GetStoreList = 0x90,
    StatRecovery = 0x97,
    FlushDelCache = 0x98,
    KillNode = 0x9a,

    CreateAndWritePeer = 0xa0,
    ReadPeer = 0xa1,
    WritePeer = 0xa2,
    RemovePeer = 0xa3,
    GetObjList = 0xa4,
    GetEpoch = 0xa5,
    NotifyVdiAdd = 0xa8,
    DeleteCache = 0xa9,
    CompleteRecovery = 0xac,

    GetHash = 0xb4,
    GetCacheInfo = 0xb6,
    CachePurge = 0xb7,
    Stat = 0xb8,
    GetLoglevel = 0xb9,
    SetLoglevel = 0xba,
    Exist = 0xbd,
    ClusterInfo = 0xbe,
    AlterClusterCopy = 0xbf,
    OidsExist = 0xc2,
    GetNid = 0xc3,
}

impl Opcode {
    /// Every known opcode
    pub const ALL: [Self; 46] = [
        Self::CreateAndWriteObj,
        Self::ReadObj,
        Self::WriteObj,
        Self::RemoveObj,
        Self::DiscardObj,
        Self::VdiRead,
        Self::VdiWrite,
        Self::NewVdi,
        Self::LockVdi,
        Self::ReleaseVdi,
        Self::GetVdiInfo,
        Self::ReadVdis,
        Self::FlushVdi,
        Self::DelVdi,
        Self::GetClusterDefault,
        Self::GetNodeList,
        Self::MakeFs,
        Self::Shutdown,
        Self::StatSheep,
        Self::StatCluster,
        Self::GetVdiAttr,
        Self::ForceRecover,
        Self::GetStoreList,
        Self::StatRecovery,
        Self::FlushDelCache,
        Self::KillNode,
        Self::CreateAndWritePeer,
        Self::ReadPeer,
        Self::WritePeer,
        Self::RemovePeer,
        Self::GetObjList,
        Self::GetEpoch,
        Self::NotifyVdiAdd,
        Self::DeleteCache,
        Self::CompleteRecovery,
        Self::GetHash,
        Self::GetCacheInfo,
        Self::CachePurge,
        Self::Stat,
        Self::GetLoglevel,
        Self::SetLoglevel,
        Self::Exist,
        Self::ClusterInfo,
        Self::AlterClusterCopy,
        Self::OidsExist,
        Self::GetNid,
    ];

    /// Wire value
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Upper-case name used in logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateAndWriteObj => "CREATE_AND_WRITE_OBJ",
            Self::ReadObj => "READ_OBJ",
            Self::WriteObj => "WRITE_OBJ",
            Self::RemoveObj => "REMOVE_OBJ",
            Self::DiscardObj => "DISCARD_OBJ",
            Self::VdiRead => "VDI_READ",
            Self::VdiWrite => "VDI_WRITE",
            Self::NewVdi => "NEW_VDI",
            Self::LockVdi => "LOCK_VDI",
            Self::ReleaseVdi => "RELEASE_VDI",
            Self::GetVdiInfo => "GET_VDI_INFO",
            Self::ReadVdis => "READ_VDIS",
            Self::FlushVdi => "FLUSH_VDI",
            Self::DelVdi => "DEL_VDI",
            Self::GetClusterDefault => "GET_CLUSTER_DEFAULT",
            Self::GetNodeList => "GET_NODE_LIST",
            Self::MakeFs => "MAKE_FS",
            Self::Shutdown => "SHUTDOWN",
            Self::StatSheep => "STAT_SHEEP",
            Self::StatCluster => "STAT_CLUSTER",
            Self::GetVdiAttr => "GET_VDI_ATTR",
            Self::ForceRecover => "FORCE_RECOVER",
            Self::GetStoreList => "GET_STORE_LIST",
            Self::StatRecovery => "STAT_RECOVERY",
            Self::FlushDelCache => "FLUSH_DEL_CACHE",
            Self::KillNode => "KILL_NODE",
            Self::CreateAndWritePeer => "CREATE_AND_WRITE_PEER",
            Self::ReadPeer => "READ_PEER",
            Self::WritePeer => "WRITE_PEER",
            Self::RemovePeer => "REMOVE_PEER",
            Self::GetObjList => "GET_OBJ_LIST",
            Self::GetEpoch => "GET_EPOCH",
            Self::NotifyVdiAdd => "NOTIFY_VDI_ADD",
            Self::DeleteCache => "DELETE_CACHE",
            Self::CompleteRecovery => "COMPLETE_RECOVERY",
            Self::GetHash => "GET_HASH",
            Self::GetCacheInfo => "GET_CACHE_INFO",
            Self::CachePurge => "CACHE_PURGE",
            Self::Stat => "STAT",
            Self::GetLoglevel => "GET_LOGLEVEL",
            Self::SetLoglevel => "SET_LOGLEVEL",
            Self::Exist => "EXIST",
            Self::ClusterInfo => "CLUSTER_INFO",
            Self::AlterClusterCopy => "ALTER_CLUSTER_COPY",
            Self::OidsExist => "OIDS_EXIST",
            Self::GetNid => "GET_NID",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.code() == raw)
            .ok_or(raw)
    }
}
