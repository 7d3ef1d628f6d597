//! Byte-oriented key-value stores with per-key TTL and glob deletes.
//!
//! Two backends implement [`KVStore`]:
//!
//! - [`MemoryStore`]: in-process map, for single-instance deployments and tests.
//! - [`RedbStore`]: embedded redb file, shareable by processes on one host.

pub mod error;
pub mod memory;
pub mod pattern;
pub mod redb;
pub mod traits;

pub use error::KVError;
pub use memory::MemoryStore;
pub use pattern::glob_match;
pub use redb::RedbStore;
pub use traits::KVStore;
