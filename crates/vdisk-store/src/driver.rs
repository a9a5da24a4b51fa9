//! Store driver interface
//!
//! A store driver owns the objects held by this node. Drivers are
//! synchronous: callers run them from the worker pool, never from the
//! async runtime threads.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use vdisk_common::{
    ATTR_OBJECT_SIZE, Epoch, INODE_SIZE, ObjectDigest, ObjectId, OpResult, ResultCode,
};

/// Space accounting reported by a driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCapacity {
    /// Total bytes the store may hold
    pub size: u64,
    /// Bytes still available
    pub free: u64,
}

/// Per-driver I/O counters
#[derive(Debug, Default)]
pub struct StoreStats {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub creates: AtomicU64,
    pub removes: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl StoreStats {
    pub(crate) fn record_read(&self, len: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, len: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_create(&self, len: usize) {
        self.creates.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Backend that persists objects on this node
pub trait StoreDriver: Send + Sync {
    /// Name used to select the driver at format time
    fn name(&self) -> &'static str;

    /// Prepare the driver for use (create directories, load state)
    fn init(&self) -> OpResult;

    /// Drop every stored object
    fn format(&self) -> OpResult;

    /// Whether `oid` is stored here
    fn exists(&self, oid: ObjectId) -> bool;

    /// Read `buf.len()` bytes at `offset` of an existing object
    ///
    /// Fails with [`ResultCode::NoObject`] if the object is absent.
    fn read(&self, oid: ObjectId, epoch: Epoch, offset: u64, buf: &mut [u8]) -> OpResult;

    /// Overwrite bytes of an existing object
    ///
    /// Fails with [`ResultCode::NoObject`] if the object is absent.
    fn write(&self, oid: ObjectId, epoch: Epoch, offset: u64, data: &[u8]) -> OpResult;

    /// Create a zero-filled object and write `data` at `offset`
    ///
    /// Creating an object that already exists replaces it.
    fn create_and_write(&self, oid: ObjectId, epoch: Epoch, offset: u64, data: &[u8])
    -> OpResult;

    /// Remove an object
    fn remove(&self, oid: ObjectId) -> OpResult;

    /// All stored object ids
    fn list(&self) -> OpResult<Vec<ObjectId>>;

    /// Space accounting
    fn capacity(&self) -> StoreCapacity;

    /// Per-driver counters
    fn stats(&self) -> &StoreStats;

    /// Digest of an object's full contents
    fn get_hash(&self, _oid: ObjectId, _epoch: Epoch) -> OpResult<ObjectDigest> {
        Err(ResultCode::NoSupport)
    }

    /// Reclaim space left behind by interrupted operations
    fn cleanup(&self) -> OpResult {
        Ok(())
    }
}

/// Allocated length of `oid` for a store using `object_size` data objects
#[must_use]
pub const fn object_len(oid: ObjectId, object_size: u64) -> u64 {
    if oid.is_inode() {
        INODE_SIZE
    } else if oid.is_attr() {
        ATTR_OBJECT_SIZE
    } else {
        object_size
    }
}

/// Check that `[offset, offset + len)` lies within an object of `total` bytes
pub(crate) fn check_range(offset: u64, len: usize, total: u64) -> OpResult {
    match offset.checked_add(len as u64) {
        Some(end) if end <= total => Ok(()),
        _ => Err(ResultCode::InvalidParameters),
    }
}

/// Drivers known to this node, by name
#[derive(Default)]
pub struct StoreDrivers {
    drivers: BTreeMap<&'static str, Arc<dyn StoreDriver>>,
}

impl StoreDrivers {
    /// Empty set of drivers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a driver; a later driver with the same name replaces the earlier one
    pub fn register(&mut self, driver: Arc<dyn StoreDriver>) {
        self.drivers.insert(driver.name(), driver);
    }

    /// Look up a driver by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<dyn StoreDriver>> {
        self.drivers.get(name).cloned()
    }

    /// Registered driver names
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.keys().copied()
    }
}

/// The driver currently selected by the cluster
///
/// Empty until the cluster is formatted. Replaced atomically by a format
/// that names a different driver.
#[derive(Default)]
pub struct ActiveStore {
    current: RwLock<Option<Arc<dyn StoreDriver>>>,
}

impl ActiveStore {
    /// No driver selected
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The selected driver, or [`ResultCode::NoStore`]
    pub fn get(&self) -> OpResult<Arc<dyn StoreDriver>> {
        self.current.read().clone().ok_or(ResultCode::NoStore)
    }

    /// Whether a driver is selected
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }

    /// Select `driver`, returning the previous selection
    pub fn set(&self, driver: Arc<dyn StoreDriver>) -> Option<Arc<dyn StoreDriver>> {
        self.current.write().replace(driver)
    }

    /// Deselect the current driver
    pub fn clear(&self) -> Option<Arc<dyn StoreDriver>> {
        self.current.write().take()
    }
}
