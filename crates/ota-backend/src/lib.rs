//! Storage interfaces consumed by the OTA update store.
//!
//! The entity store and the cache/metrics service never talk to a concrete
//! database or object store. They consume two narrow async interfaces:
//!
//! - [`KvStore`] -- whole-value get/set for the entity snapshot, plus hash
//!   fields with atomic increment, TTL, and all-or-nothing batches for
//!   response caching and usage counters.
//! - [`BlobStore`] -- put/get/delete of release archives by id, returning a
//!   public URL.
//!
//! # Backends
//!
//! - [`InMemoryKv`] -- redis-like store with numbered logical databases
//! - [`InMemoryBlobStore`] -- `HashMap`-backed blob store with a URL prefix
//!
//! Both are meant for tests and single-process embedding; production
//! deployments plug their own client in behind the same traits.

pub mod blob;
pub mod error;
pub mod kv;
pub mod memory_blob;
pub mod memory_kv;

pub use blob::BlobStore;
pub use error::{BlobError, BlobResult, KvError, KvResult};
pub use kv::{HashOp, KvStore};
pub use memory_blob::InMemoryBlobStore;
pub use memory_kv::InMemoryKv;
