//! In-memory store driver
//!
//! Holds every object in a concurrent map. Used by tests and by
//! throwaway single-node clusters.

use crate::driver::{StoreCapacity, StoreDriver, StoreStats, check_range, object_len};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use vdisk_common::{Epoch, ObjectDigest, ObjectId, OpResult, ResultCode};

/// Default capacity advertised by a memory store: 1 GiB
pub const DEFAULT_MEMORY_CAPACITY: u64 = 1 << 30;

struct StoredObject {
    /// Epoch of the last create or write
    epoch: Epoch,
    data: Vec<u8>,
}

/// Store driver backed by process memory
pub struct MemoryStore {
    objects: DashMap<ObjectId, StoredObject>,
    object_size: u64,
    capacity: u64,
    used: AtomicU64,
    stats: StoreStats,
}

impl MemoryStore {
    /// Create an empty store for objects of `object_size` bytes
    #[must_use]
    pub fn new(object_size: u64) -> Self {
        Self::with_capacity(object_size, DEFAULT_MEMORY_CAPACITY)
    }

    /// Create an empty store advertising `capacity` bytes
    #[must_use]
    pub fn with_capacity(object_size: u64, capacity: u64) -> Self {
        Self {
            objects: DashMap::new(),
            object_size,
            capacity,
            used: AtomicU64::new(0),
            stats: StoreStats::default(),
        }
    }

    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Epoch in which `oid` was last created or written
    #[must_use]
    pub fn epoch_of(&self, oid: ObjectId) -> Option<Epoch> {
        self.objects.get(&oid).map(|o| o.epoch)
    }
}

impl StoreDriver for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn init(&self) -> OpResult {
        Ok(())
    }

    fn format(&self) -> OpResult {
        self.objects.clear();
        self.used.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn exists(&self, oid: ObjectId) -> bool {
        self.objects.contains_key(&oid)
    }

    fn read(&self, oid: ObjectId, _epoch: Epoch, offset: u64, buf: &mut [u8]) -> OpResult {
        let object = self.objects.get(&oid).ok_or(ResultCode::NoObject)?;
        check_range(offset, buf.len(), object.data.len() as u64)?;

        let start = offset as usize;
        buf.copy_from_slice(&object.data[start..start + buf.len()]);
        self.stats.record_read(buf.len());
        Ok(())
    }

    fn write(&self, oid: ObjectId, epoch: Epoch, offset: u64, data: &[u8]) -> OpResult {
        let mut object = self.objects.get_mut(&oid).ok_or(ResultCode::NoObject)?;
        check_range(offset, data.len(), object.data.len() as u64)?;

        let start = offset as usize;
        object.data[start..start + data.len()].copy_from_slice(data);
        object.epoch = object.epoch.max(epoch);
        self.stats.record_write(data.len());
        Ok(())
    }

    fn create_and_write(
        &self,
        oid: ObjectId,
        epoch: Epoch,
        offset: u64,
        data: &[u8],
    ) -> OpResult {
        let len = object_len(oid, self.object_size);
        check_range(offset, data.len(), len)?;

        if !self.objects.contains_key(&oid) {
            let used = self.used.load(Ordering::Relaxed);
            if used.saturating_add(len) > self.capacity {
                return Err(ResultCode::NoSpace);
            }
        }

        let mut object = vec![0u8; len as usize];
        let start = offset as usize;
        object[start..start + data.len()].copy_from_slice(data);

        let stored = StoredObject {
            epoch,
            data: object,
        };
        if let Some(previous) = self.objects.insert(oid, stored) {
            self.used
                .fetch_sub(previous.data.len() as u64, Ordering::Relaxed);
        }
        self.used.fetch_add(len, Ordering::Relaxed);
        self.stats.record_create(data.len());
        Ok(())
    }

    fn remove(&self, oid: ObjectId) -> OpResult {
        let (_, object) = self.objects.remove(&oid).ok_or(ResultCode::NoObject)?;
        self.used
            .fetch_sub(object.data.len() as u64, Ordering::Relaxed);
        self.stats.record_remove();
        Ok(())
    }

    fn list(&self) -> OpResult<Vec<ObjectId>> {
        let mut oids: Vec<ObjectId> = self.objects.iter().map(|e| *e.key()).collect();
        oids.sort_unstable();
        Ok(oids)
    }

    fn capacity(&self) -> StoreCapacity {
        StoreCapacity {
            size: self.capacity,
            free: self
                .capacity
                .saturating_sub(self.used.load(Ordering::Relaxed)),
        }
    }

    fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn get_hash(&self, oid: ObjectId, _epoch: Epoch) -> OpResult<ObjectDigest> {
        let object = self.objects.get(&oid).ok_or(ResultCode::NoObject)?;
        Ok(ObjectDigest::compute(&object.data))
    }
}
