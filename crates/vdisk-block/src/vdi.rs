//! VDI state for block storage
//!
//! Every VDI known to the node is held in a [`VdiTable`]. A [`Vdi`] pairs
//! the in-memory inode with the lock guarding it; the lock is held only
//! to read or update the slot owners, never across I/O.

use crate::inode::Inode;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use vdisk_common::checksum::name_hash;
use vdisk_common::{MAX_VDI_ID, MAX_VDI_LEN, OpResult, ResultCode, VdiId};

/// One virtual disk image
#[derive(Debug)]
pub struct Vdi {
    vid: VdiId,
    inode: RwLock<Inode>,
    snapshot: AtomicBool,
}

impl Vdi {
    /// Wrap an inode
    #[must_use]
    pub fn new(inode: Inode) -> Self {
        Self {
            vid: inode.vdi_id,
            snapshot: AtomicBool::new(inode.snap_ctime != 0),
            inode: RwLock::new(inode),
        }
    }

    /// VDI id
    #[must_use]
    pub const fn id(&self) -> VdiId {
        self.vid
    }

    /// Owner of slot `idx`
    #[must_use]
    pub fn owner(&self, idx: u64) -> VdiId {
        self.inode.read().owner(idx)
    }

    /// Record `owner` for slot `idx`
    pub fn set_owner(&self, idx: u64, owner: VdiId) -> OpResult {
        self.inode
            .write()
            .set_owner(idx, owner)
            .map_err(|_| ResultCode::InvalidParameters)
    }

    /// Shared view of the inode
    pub fn inode(&self) -> RwLockReadGuard<'_, Inode> {
        self.inode.read()
    }

    /// Whether the VDI was frozen into a snapshot
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.snapshot.load(Ordering::Acquire)
    }

    /// Freeze the VDI into a snapshot
    pub fn mark_snapshot(&self) {
        let mut inode = self.inode.write();
        if inode.snap_ctime == 0 {
            inode.snap_ctime = chrono::Utc::now().timestamp().unsigned_abs();
        }
        self.snapshot.store(true, Ordering::Release);
    }
}

/// Result of preparing a new VDI
#[derive(Debug, Clone)]
pub struct NewVdi {
    /// Inode of the new working VDI
    pub inode: Inode,
    /// Base inode, updated to become a snapshot, when snapshotting
    pub base: Option<Inode>,
}

/// Parameters for a new VDI
#[derive(Debug, Clone)]
pub struct VdiSpec {
    pub name: String,
    pub vdi_size: u64,
    pub block_size_shift: u8,
    pub nr_copies: u8,
    pub copy_policy: u8,
    /// Snapshot the current working VDI of this name instead of creating one
    pub snapshot: bool,
}

/// All VDIs known to this node
#[derive(Debug, Default)]
pub struct VdiTable {
    /// VDIs by id
    vdis: RwLock<HashMap<VdiId, Arc<Vdi>>>,
    /// VDI name to ids by snapshot id
    names: RwLock<HashMap<String, BTreeMap<u32, VdiId>>>,
    /// Ids in use cluster-wide
    in_use: RwLock<BTreeSet<VdiId>>,
}

impl VdiTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a free id for `name`: its hash, linearly probed
    pub fn alloc_vid(&self, name: &str) -> OpResult<VdiId> {
        let in_use = self.in_use.read();
        let vdis = self.vdis.read();
        let start = (name_hash(name) % u64::from(MAX_VDI_ID)) as u32;

        for i in 0..MAX_VDI_ID {
            let vid = VdiId::new((start + i) % MAX_VDI_ID);
            if vid.is_none() || in_use.contains(&vid) || vdis.contains_key(&vid) {
                continue;
            }
            return Ok(vid);
        }
        Err(ResultCode::FullVdi)
    }

    /// Build the inode(s) for a new VDI without registering anything
    pub fn prepare(&self, spec: &VdiSpec) -> OpResult<NewVdi> {
        if spec.name.is_empty() || spec.name.len() >= MAX_VDI_LEN {
            return Err(ResultCode::InvalidParameters);
        }

        let working = self.working(&spec.name);
        match (spec.snapshot, working) {
            (false, Some(_)) => Err(ResultCode::VdiExists),
            (false, None) => {
                let vid = self.alloc_vid(&spec.name)?;
                let mut inode = Inode::new(
                    spec.name.clone(),
                    vid,
                    spec.vdi_size,
                    spec.block_size_shift,
                    spec.nr_copies,
                );
                inode.copy_policy = spec.copy_policy;
                Ok(NewVdi { inode, base: None })
            }
            (true, None) => Err(ResultCode::NoVdi),
            (true, Some(base)) => {
                let vid = self.alloc_vid(&spec.name)?;
                let mut base_inode = base.inode().clone();
                let inode = base_inode.derive(vid, base_inode.snap_id + 1);
                base_inode.snap_ctime = chrono::Utc::now().timestamp().unsigned_abs();
                base_inode
                    .add_child(vid)
                    .map_err(|_| ResultCode::InvalidParameters)?;
                Ok(NewVdi {
                    inode,
                    base: Some(base_inode),
                })
            }
        }
    }

    /// Add a VDI to the table, replacing any VDI with the same id
    pub fn register(&self, inode: Inode) -> Arc<Vdi> {
        let vid = inode.vdi_id;
        let name = inode.name.clone();
        let snap_id = inode.snap_id;
        let vdi = Arc::new(Vdi::new(inode));

        self.vdis.write().insert(vid, Arc::clone(&vdi));
        self.names
            .write()
            .entry(name)
            .or_default()
            .insert(snap_id, vid);
        self.in_use.write().insert(vid);
        debug!("registered VDI {}", vid);
        vdi
    }

    /// Id of `name` at `snap_id`, or of its working VDI when `snap_id` is 0
    pub fn lookup(&self, name: &str, snap_id: u32) -> OpResult<VdiId> {
        let names = self.names.read();
        let snaps = names.get(name).ok_or(ResultCode::NoVdi)?;
        if snap_id == 0 {
            return snaps
                .values()
                .next_back()
                .copied()
                .ok_or(ResultCode::NoVdi);
        }
        snaps.get(&snap_id).copied().ok_or(ResultCode::NoVdi)
    }

    /// The VDI with id `vid`
    pub fn get(&self, vid: VdiId) -> OpResult<Arc<Vdi>> {
        self.vdis.read().get(&vid).cloned().ok_or(ResultCode::NoVdi)
    }

    /// Current working VDI named `name`
    fn working(&self, name: &str) -> Option<Arc<Vdi>> {
        let vid = self.lookup(name, 0).ok()?;
        self.get(vid).ok().filter(|vdi| !vdi.is_snapshot())
    }

    /// Drop a VDI
    pub fn remove(&self, vid: VdiId) -> Option<Arc<Vdi>> {
        let vdi = self.vdis.write().remove(&vid)?;
        {
            let inode = vdi.inode();
            let mut names = self.names.write();
            if let Some(snaps) = names.get_mut(&inode.name) {
                snaps.remove(&inode.snap_id);
                if snaps.is_empty() {
                    names.remove(&inode.name);
                }
            }
        }
        self.in_use.write().remove(&vid);
        debug!("removed VDI {}", vid);
        Some(vdi)
    }

    /// Freeze `vid` into a snapshot
    pub fn mark_snapshot(&self, vid: VdiId) -> OpResult {
        self.get(vid)?.mark_snapshot();
        Ok(())
    }

    /// Mark `vid` as in use without registering a VDI for it
    pub fn set_in_use(&self, vid: VdiId) {
        self.in_use.write().insert(vid);
    }

    /// Whether `vid` is in use
    #[must_use]
    pub fn is_in_use(&self, vid: VdiId) -> bool {
        self.in_use.read().contains(&vid)
    }

    /// All ids in use, ascending
    #[must_use]
    pub fn in_use(&self) -> Vec<VdiId> {
        self.in_use.read().iter().copied().collect()
    }

    /// Number of registered VDIs
    #[must_use]
    pub fn len(&self) -> usize {
        self.vdis.read().len()
    }

    /// Whether no VDI is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vdis.read().is_empty()
    }

    /// Forget every VDI
    pub fn clear(&self) {
        self.vdis.write().clear();
        self.names.write().clear();
        self.in_use.write().clear();
    }
}
