//! vdisk store - Local object storage
//!
//! This crate implements the store drivers a node keeps its objects in:
//! - The [`StoreDriver`] interface and the set of known drivers
//! - [`PlainStore`], one file per object
//! - [`MemoryStore`], objects held in memory
//! - [`ActiveStore`], the driver selected when the cluster is formatted

pub mod driver;
pub mod memory;
pub mod plain;

// Re-exports
pub use driver::{ActiveStore, StoreCapacity, StoreDriver, StoreDrivers, StoreStats, object_len};
pub use memory::{DEFAULT_MEMORY_CAPACITY, MemoryStore};
pub use plain::PlainStore;
