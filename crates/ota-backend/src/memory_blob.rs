use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::blob::BlobStore;
use crate::error::{BlobError, BlobResult};

/// In-memory blob store.
///
/// Holds uploaded bytes keyed by blob id and hands out URLs of the form
/// `{base_url}/{id}`. Deletes can be forced to fail to exercise callers'
/// consistency handling.
pub struct InMemoryBlobStore {
    base_url: String,
    blobs: RwLock<HashMap<String, Bytes>>,
    fail_deletes: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `delete` fail with [`BlobError::Backend`].
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Stored bytes for `id`.
    pub fn read(&self, id: &str) -> Option<Bytes> {
        self.blobs.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn url_for(&self, id: &str) -> String {
        format!("{}/{id}", self.base_url)
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> BlobError {
        BlobError::Backend(format!("lock poisoned: {e}"))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        id: &str,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        length: u64,
    ) -> BlobResult<String> {
        let mut buf = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        stream.read_to_end(&mut buf).await?;
        let received = buf.len() as u64;
        if received != length {
            return Err(BlobError::LengthMismatch {
                id: id.to_string(),
                declared: length,
                received,
            });
        }

        self.blobs
            .write()
            .map_err(Self::lock_err)?
            .insert(id.to_string(), Bytes::from(buf));
        debug!(blob_id = id, bytes = received, "blob stored");
        Ok(self.url_for(id))
    }

    async fn get(&self, id: &str) -> BlobResult<String> {
        let blobs = self.blobs.read().map_err(Self::lock_err)?;
        if blobs.contains_key(id) {
            Ok(self.url_for(id))
        } else {
            Err(BlobError::NotFound(id.to_string()))
        }
    }

    async fn delete(&self, id: &str) -> BlobResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Backend(format!("delete of {id} rejected")));
        }
        let mut blobs = self.blobs.write().map_err(Self::lock_err)?;
        match blobs.remove(id) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound(id.to_string())),
        }
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("base_url", &self.base_url)
            .field("blob_count", &self.len())
            .finish()
    }
}
