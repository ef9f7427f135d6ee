//! Persistence of namespace partitions.
//!
//! - [`disk`]: one directory per namespace, one file per entry

pub mod disk;

pub use disk::{DiskStore, StorageError, StoredPartition};
