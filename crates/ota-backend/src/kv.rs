use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvResult;

/// One command inside an atomic [`KvStore::batch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashOp {
    /// Add `delta` to an integer hash field, creating it at 0 first.
    IncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Set a hash field to a string value.
    Set {
        key: String,
        field: String,
        value: String,
    },
}

impl HashOp {
    pub fn incr_by(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        HashOp::IncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }

    pub fn set(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        HashOp::Set {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// The hash key this command touches.
    pub fn key(&self) -> &str {
        match self {
            HashOp::IncrBy { key, .. } | HashOp::Set { key, .. } => key,
        }
    }
}

/// Durable key-value backend.
///
/// One handle addresses one logical database. Implementations must satisfy:
/// - `hincrby` and `batch` are atomic with respect to every other command,
///   across all handles sharing the backend. Concurrent increments are
///   never lost.
/// - `batch` is all-or-nothing: if any command fails validation, none is
///   applied and readers never observe a partial batch.
/// - A key whose TTL has elapsed behaves exactly like a missing key.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a whole string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Replace a whole string value, clearing any TTL on the key.
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Delete keys of any type. Returns how many existed.
    async fn del(&self, keys: &[&str]) -> KvResult<u64>;

    /// Set a TTL on an existing key. Returns `false` if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool>;

    /// Remaining TTL, or `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>>;

    /// Set a hash field. Returns `true` if the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<bool>;

    /// Delete a hash field. Returns `true` if it existed.
    async fn hdel(&self, key: &str, field: &str) -> KvResult<bool>;

    /// All fields of a hash; empty when the key is missing.
    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>>;

    /// Atomically add `delta` to an integer field and return the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvResult<i64>;

    /// Apply every command atomically, in order.
    async fn batch(&self, ops: Vec<HashOp>) -> KvResult<()>;

    /// Liveness probe.
    async fn ping(&self) -> KvResult<()>;
}
