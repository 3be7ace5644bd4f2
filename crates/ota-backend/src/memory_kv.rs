use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{KvError, KvResult};
use crate::kv::{HashOp, KvStore};

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

type Database = HashMap<String, Entry>;

#[derive(Default)]
struct Shared {
    databases: RwLock<HashMap<u32, Database>>,
    offline: AtomicBool,
}

/// In-memory, redis-like key-value backend.
///
/// A backend holds numbered logical databases; each handle addresses one of
/// them and [`select`](Self::select) returns a handle on another database of
/// the same backend. Every command runs under one lock, so increments and
/// batches are atomic across handles. TTLs are measured on tokio's clock
/// and expired keys are dropped lazily.
#[derive(Clone)]
pub struct InMemoryKv {
    shared: Arc<Shared>,
    db: u32,
}

impl InMemoryKv {
    /// Create a new empty backend and return a handle on database 0.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            db: 0,
        }
    }

    /// Handle on logical database `db` of the same backend.
    pub fn select(&self, db: u32) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            db,
        }
    }

    /// The logical database this handle addresses.
    pub fn database(&self) -> u32 {
        self.db
    }

    /// Simulate the backend going away. While offline every command on every
    /// handle fails with [`KvError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys in this handle's database.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.shared
            .databases
            .read()
            .map(|dbs| {
                dbs.get(&self.db)
                    .map(|db| db.values().filter(|e| e.is_live(now)).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn check_online(&self) -> KvResult<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    fn with_read<R>(
        &self,
        f: impl FnOnce(Option<&Database>, Instant) -> KvResult<R>,
    ) -> KvResult<R> {
        self.check_online()?;
        let dbs = self
            .shared
            .databases
            .read()
            .map_err(|e| KvError::Unavailable(format!("lock poisoned: {e}")))?;
        f(dbs.get(&self.db), Instant::now())
    }

    fn with_write<R>(
        &self,
        f: impl FnOnce(&mut Database, Instant) -> KvResult<R>,
    ) -> KvResult<R> {
        self.check_online()?;
        let mut dbs = self
            .shared
            .databases
            .write()
            .map_err(|e| KvError::Unavailable(format!("lock poisoned: {e}")))?;
        f(dbs.entry(self.db).or_default(), Instant::now())
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a>(db: Option<&'a Database>, key: &str, now: Instant) -> Option<&'a Entry> {
    db?.get(key).filter(|e| e.is_live(now))
}

fn purge(db: &mut Database, key: &str, now: Instant) {
    if db.get(key).is_some_and(|e| !e.is_live(now)) {
        db.remove(key);
    }
}

fn hash_mut<'a>(db: &'a mut Database, key: &str) -> KvResult<&'a mut HashMap<String, String>> {
    let entry = db.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Hash(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(hash) => Ok(hash),
        Value::Str(_) => Err(KvError::WrongType { key: key.into() }),
    }
}

fn incr_field(
    hash: &mut HashMap<String, String>,
    key: &str,
    field: &str,
    delta: i64,
) -> KvResult<i64> {
    let current = match hash.get(field) {
        Some(raw) => raw.parse::<i64>().map_err(|_| KvError::NotInteger {
            key: key.into(),
            field: field.into(),
        })?,
        None => 0,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| KvError::Overflow {
            key: key.into(),
            field: field.into(),
        })?;
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.with_read(|db, now| match live(db, key, now) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType { key: key.into() }),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.with_write(|db, _| {
            db.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.with_read(|db, now| Ok(live(db, key, now).is_some()))
    }

    async fn del(&self, keys: &[&str]) -> KvResult<u64> {
        self.with_write(|db, now| {
            let mut removed = 0;
            for key in keys {
                purge(db, key, now);
                if db.remove(*key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        self.with_write(|db, now| {
            purge(db, key, now);
            match db.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(now + ttl);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        self.with_read(|db, now| {
            Ok(live(db, key, now)
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now)))
        })
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.with_read(|db, now| match live(db, key, now) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(KvError::WrongType { key: key.into() }),
            None => Ok(None),
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        self.with_write(|db, now| {
            purge(db, key, now);
            let hash = hash_mut(db, key)?;
            Ok(hash.insert(field.to_string(), value.to_string()).is_none())
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> KvResult<bool> {
        self.with_write(|db, now| {
            purge(db, key, now);
            let Some(entry) = db.get_mut(key) else {
                return Ok(false);
            };
            let Value::Hash(hash) = &mut entry.value else {
                return Err(KvError::WrongType { key: key.into() });
            };
            let existed = hash.remove(field).is_some();
            if hash.is_empty() {
                db.remove(key);
            }
            Ok(existed)
        })
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.with_read(|db, now| match live(db, key, now) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(KvError::WrongType { key: key.into() }),
            None => Ok(HashMap::new()),
        })
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.with_write(|db, now| {
            purge(db, key, now);
            let hash = hash_mut(db, key)?;
            incr_field(hash, key, field, delta)
        })
    }

    async fn batch(&self, ops: Vec<HashOp>) -> KvResult<()> {
        self.with_write(|db, now| {
            // Stage every touched hash so a failing command leaves the
            // database untouched.
            let mut staged: HashMap<String, HashMap<String, String>> = HashMap::new();
            for op in &ops {
                let key = op.key();
                purge(db, key, now);
                let hash = match staged.entry(key.to_string()) {
                    MapEntry::Occupied(slot) => slot.into_mut(),
                    MapEntry::Vacant(slot) => {
                        let current = match db.get(key) {
                            Some(Entry {
                                value: Value::Hash(h),
                                ..
                            }) => h.clone(),
                            Some(_) => return Err(KvError::WrongType { key: key.into() }),
                            None => HashMap::new(),
                        };
                        slot.insert(current)
                    }
                };
                match op {
                    HashOp::IncrBy { field, delta, .. } => {
                        incr_field(hash, key, field, *delta)?;
                    }
                    HashOp::Set { field, value, .. } => {
                        hash.insert(field.clone(), value.clone());
                    }
                }
            }

            for (key, hash) in staged {
                match db.get_mut(&key) {
                    Some(entry) => entry.value = Value::Hash(hash),
                    None => {
                        db.insert(
                            key,
                            Entry {
                                value: Value::Hash(hash),
                                expires_at: None,
                            },
                        );
                    }
                }
            }
            Ok(())
        })
    }

    async fn ping(&self) -> KvResult<()> {
        self.check_online()
    }
}

impl std::fmt::Debug for InMemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKv")
            .field("db", &self.db)
            .field("key_count", &self.key_count())
            .finish()
    }
}
