//! VDI inode
//!
//! The inode object of a VDI holds its metadata and, for every object
//! slot, the id of the VDI that owns the slot's data object.
//!
//! On-disk layout (little-endian):
//!
//! ```text
//! offset  size   field
//! 0       256    name (NUL padded)
//! 256     256    tag (NUL padded)
//! 512     8      create_time
//! 520     8      snap_ctime
//! 528     8      vm_clock_nsec
//! 536     8      vdi_size
//! 544     8      vm_state_size
//! 552     1      copy_policy
//! 553     1      store_policy
//! 554     1      nr_copies
//! 555     1      block_size_shift
//! 556     4      snap_id
//! 560     4      vdi_id
//! 564     4      parent_vdi_id
//! 568     4096   child_vdi_id[1024]
//! 4664    4 * N  data_vdi_id[N]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vdisk_common::{
    Error, INODE_HEADER_SIZE, MAX_CHILDREN, MAX_DATA_OBJS, MAX_VDI_LEN, Result, VdiId,
};

/// Length of the NUL-padded snapshot tag field
pub const TAG_LEN: usize = 256;

/// Byte offset of slot `idx`'s owner inside the inode object
#[must_use]
pub const fn owner_offset(idx: u64) -> u64 {
    INODE_HEADER_SIZE + 4 * idx
}

/// Metadata of one VDI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub name: String,
    pub tag: String,
    /// Creation time, seconds since the epoch
    pub create_time: u64,
    /// Time the VDI was frozen into a snapshot (0 for working VDIs)
    pub snap_ctime: u64,
    pub vm_clock_nsec: u64,
    pub vdi_size: u64,
    pub vm_state_size: u64,
    pub copy_policy: u8,
    pub store_policy: u8,
    pub nr_copies: u8,
    /// log2 of the object size
    pub block_size_shift: u8,
    pub snap_id: u32,
    pub vdi_id: VdiId,
    pub parent_vdi_id: VdiId,
    pub child_vdi_id: Vec<VdiId>,
    /// Owner of each slot; slots past the end are unallocated
    data_vdi_id: Vec<VdiId>,
}

impl Inode {
    /// Fresh working VDI with every slot unallocated
    pub fn new(
        name: impl Into<String>,
        vdi_id: VdiId,
        vdi_size: u64,
        block_size_shift: u8,
        nr_copies: u8,
    ) -> Self {
        Self {
            name: name.into(),
            tag: String::new(),
            create_time: chrono::Utc::now().timestamp().unsigned_abs(),
            snap_ctime: 0,
            vm_clock_nsec: 0,
            vdi_size,
            vm_state_size: 0,
            copy_policy: 0,
            store_policy: 0,
            nr_copies,
            block_size_shift,
            snap_id: 1,
            vdi_id,
            parent_vdi_id: VdiId::NONE,
            child_vdi_id: Vec::new(),
            data_vdi_id: Vec::new(),
        }
    }

    /// Object size of this VDI
    #[must_use]
    pub const fn object_size(&self) -> u64 {
        1 << self.block_size_shift
    }

    /// Number of slots covering the VDI
    #[must_use]
    pub fn nr_slots(&self) -> u64 {
        self.vdi_size.div_ceil(self.object_size()).min(MAX_DATA_OBJS)
    }

    /// VDI owning slot `idx`, or [`VdiId::NONE`]
    #[must_use]
    pub fn owner(&self, idx: u64) -> VdiId {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.data_vdi_id.get(i))
            .copied()
            .unwrap_or(VdiId::NONE)
    }

    /// Record `vid` as the owner of slot `idx`
    pub fn set_owner(&mut self, idx: u64, vid: VdiId) -> Result<()> {
        if idx >= MAX_DATA_OBJS {
            return Err(Error::invalid_argument(format!(
                "slot {idx} beyond the last addressable slot"
            )));
        }
        let i = idx as usize;
        if i >= self.data_vdi_id.len() {
            if vid.is_none() {
                return Ok(());
            }
            self.data_vdi_id.resize(i + 1, VdiId::NONE);
        }
        self.data_vdi_id[i] = vid;
        Ok(())
    }

    /// Slots with an owner, in index order
    pub fn owned_slots(&self) -> impl Iterator<Item = (u64, VdiId)> + '_ {
        self.data_vdi_id
            .iter()
            .enumerate()
            .filter(|(_, vid)| !vid.is_none())
            .map(|(idx, vid)| (idx as u64, *vid))
    }

    /// Record a child VDI
    pub fn add_child(&mut self, vid: VdiId) -> Result<()> {
        if self.child_vdi_id.len() >= MAX_CHILDREN {
            return Err(Error::invalid_argument(format!(
                "VDI {} has too many children",
                self.vdi_id
            )));
        }
        self.child_vdi_id.push(vid);
        Ok(())
    }

    /// New working VDI `vdi_id` derived from this one
    ///
    /// The child shares every slot with this VDI until it writes to them.
    #[must_use]
    pub fn derive(&self, vdi_id: VdiId, snap_id: u32) -> Self {
        Self {
            name: self.name.clone(),
            tag: String::new(),
            create_time: chrono::Utc::now().timestamp().unsigned_abs(),
            snap_ctime: 0,
            vm_clock_nsec: 0,
            vdi_size: self.vdi_size,
            vm_state_size: 0,
            copy_policy: self.copy_policy,
            store_policy: self.store_policy,
            nr_copies: self.nr_copies,
            block_size_shift: self.block_size_shift,
            snap_id,
            vdi_id,
            parent_vdi_id: self.vdi_id,
            child_vdi_id: Vec::new(),
            data_vdi_id: self.data_vdi_id.clone(),
        }
    }

    /// Encode the header only
    #[must_use]
    pub fn encode_header(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(INODE_HEADER_SIZE as usize);
        put_padded(&mut buf, &self.name, MAX_VDI_LEN);
        put_padded(&mut buf, &self.tag, TAG_LEN);
        buf.put_u64_le(self.create_time);
        buf.put_u64_le(self.snap_ctime);
        buf.put_u64_le(self.vm_clock_nsec);
        buf.put_u64_le(self.vdi_size);
        buf.put_u64_le(self.vm_state_size);
        buf.put_u8(self.copy_policy);
        buf.put_u8(self.store_policy);
        buf.put_u8(self.nr_copies);
        buf.put_u8(self.block_size_shift);
        buf.put_u32_le(self.snap_id);
        buf.put_u32_le(self.vdi_id.get());
        buf.put_u32_le(self.parent_vdi_id.get());
        for i in 0..MAX_CHILDREN {
            let child = self.child_vdi_id.get(i).copied().unwrap_or(VdiId::NONE);
            buf.put_u32_le(child.get());
        }
        buf
    }

    /// Encode the header followed by the owners of every allocated slot
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = self.encode_header();
        buf.reserve(self.data_vdi_id.len() * 4);
        for vid in &self.data_vdi_id {
            buf.put_u32_le(vid.get());
        }
        buf.freeze()
    }

    /// Decode an inode; missing trailing owners are unallocated
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < INODE_HEADER_SIZE as usize {
            return Err(corrupt(0, format!("short inode: {} bytes", buf.len())));
        }

        let name = get_padded(&mut buf, MAX_VDI_LEN);
        let tag = get_padded(&mut buf, TAG_LEN);
        let create_time = buf.get_u64_le();
        let snap_ctime = buf.get_u64_le();
        let vm_clock_nsec = buf.get_u64_le();
        let vdi_size = buf.get_u64_le();
        let vm_state_size = buf.get_u64_le();
        let copy_policy = buf.get_u8();
        let store_policy = buf.get_u8();
        let nr_copies = buf.get_u8();
        let block_size_shift = buf.get_u8();
        let snap_id = buf.get_u32_le();
        let vdi_id = VdiId::new(buf.get_u32_le());
        let parent_vdi_id = VdiId::new(buf.get_u32_le());

        if block_size_shift >= 64 {
            return Err(corrupt(
                vdi_id.get(),
                format!("block size shift {block_size_shift}"),
            ));
        }

        let mut child_vdi_id = Vec::new();
        for _ in 0..MAX_CHILDREN {
            let child = buf.get_u32_le();
            if child != 0 {
                child_vdi_id.push(VdiId::new(child));
            }
        }

        let mut inode = Self {
            name,
            tag,
            create_time,
            snap_ctime,
            vm_clock_nsec,
            vdi_size,
            vm_state_size,
            copy_policy,
            store_policy,
            nr_copies,
            block_size_shift,
            snap_id,
            vdi_id,
            parent_vdi_id,
            child_vdi_id,
            data_vdi_id: Vec::new(),
        };

        let slots = (buf.remaining() / 4).min(inode.nr_slots() as usize);
        let mut owners = Vec::with_capacity(slots);
        for _ in 0..slots {
            owners.push(VdiId::new(buf.get_u32_le()));
        }
        while owners.last().is_some_and(|vid| vid.is_none()) {
            owners.pop();
        }
        inode.data_vdi_id = owners;

        Ok(inode)
    }
}

fn corrupt(vid: u32, reason: String) -> Error {
    Error::CorruptInode { vid, reason }
}

pub(crate) fn put_padded(buf: &mut BytesMut, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len - 1);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, len - n);
}

pub(crate) fn get_padded(buf: &mut &[u8], len: usize) -> String {
    let field = &buf[..len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    let s = String::from_utf8_lossy(&field[..end]).into_owned();
    buf.advance(len);
    s
}
