//! VDI attributes
//!
//! Attributes are small key/value records attached to a VDI name. Each
//! one lives in its own attribute object, laid out as (little-endian):
//!
//! ```text
//! offset  size   field
//! 0       256    name (NUL padded)
//! 256     256    tag (NUL padded)
//! 512     8      ctime
//! 520     4      snap_id
//! 524     4      value_len
//! 528     256    key (NUL padded)
//! 784     N      value
//! ```
//!
//! A deleted attribute keeps its object with an empty name, so lookups
//! of other keys still scan past it.

use crate::inode::{TAG_LEN, get_padded, put_padded};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use vdisk_common::checksum::name_hash;
use vdisk_common::{
    ATTR_HEADER_SIZE, Error, MAX_ATTR_KEY_LEN, MAX_ATTR_VALUE_LEN, MAX_VDI_LEN, Result,
};

/// One attribute record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdiAttr {
    pub name: String,
    pub tag: String,
    /// Creation time of the VDI the attribute belongs to
    pub ctime: u64,
    pub snap_id: u32,
    pub key: String,
    pub value: Vec<u8>,
}

impl VdiAttr {
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            tag: String::new(),
            ctime: 0,
            snap_id: 0,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether `other` is the same attribute, whatever its value
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tag == other.tag
            && self.ctime == other.ctime
            && self.key == other.key
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.name.is_empty()
    }

    /// First attribute id tried for this key
    #[must_use]
    pub fn start_id(&self) -> u32 {
        (name_hash(&self.key) & u64::from(u32::MAX)) as u32
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ATTR_HEADER_SIZE as usize + self.value.len());
        put_padded(&mut buf, &self.name, MAX_VDI_LEN);
        put_padded(&mut buf, &self.tag, TAG_LEN);
        buf.put_u64_le(self.ctime);
        buf.put_u32_le(self.snap_id);
        buf.put_u32_le(self.value.len() as u32);
        put_padded(&mut buf, &self.key, MAX_ATTR_KEY_LEN);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decode a record; `buf` must hold the whole value
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < ATTR_HEADER_SIZE as usize {
            return Err(Error::invalid_argument(format!(
                "short attribute: {} bytes",
                buf.len()
            )));
        }

        let name = get_padded(&mut buf, MAX_VDI_LEN);
        let tag = get_padded(&mut buf, TAG_LEN);
        let ctime = buf.get_u64_le();
        let snap_id = buf.get_u32_le();
        let value_len = buf.get_u32_le() as usize;
        let key = get_padded(&mut buf, MAX_ATTR_KEY_LEN);
        if value_len > MAX_ATTR_VALUE_LEN || value_len > buf.len() {
            return Err(Error::invalid_argument(format!(
                "attribute value of {value_len} bytes"
            )));
        }

        Ok(Self {
            name,
            tag,
            ctime,
            snap_id,
            key,
            value: buf[..value_len].to_vec(),
        })
    }
}
