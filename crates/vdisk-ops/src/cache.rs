//! Object cache hooks
//!
//! A node may keep a write-back cache of VDI objects. The operation layer
//! only needs to flush and drop it; the cache itself lives elsewhere.

use serde::{Deserialize, Serialize};
use vdisk_common::{OpResult, VdiId};

/// Usage of one VDI's cached objects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdiCacheInfo {
    pub vid: VdiId,
    /// Bytes cached
    pub size: u64,
    /// Bytes not yet written back
    pub dirty: u64,
}

/// Cache usage reported by GET_CACHE_INFO
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Capacity in bytes
    pub size: u64,
    pub used: u64,
    pub vdis: Vec<VdiCacheInfo>,
}

/// Per-VDI write-back cache
pub trait ObjectCache: Send + Sync {
    /// Write back every dirty object of `vid`
    fn flush_vdi(&self, vid: VdiId) -> OpResult;

    /// Drop every cached object of `vid` without writing back
    fn delete_vdi(&self, vid: VdiId);

    /// Write back, then drop
    fn flush_and_delete(&self, vid: VdiId) -> OpResult {
        self.flush_vdi(vid)?;
        self.delete_vdi(vid);
        Ok(())
    }

    /// Drop the whole cache
    fn format(&self);

    fn info(&self) -> CacheInfo;
}
