use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::BlobResult;

/// Object storage for release archives.
///
/// The entity store delegates bytes here and keeps only the id-to-URL side
/// table itself.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `length` bytes read from `stream` under `id` and return the
    /// public URL of the stored object.
    async fn put(
        &self,
        id: &str,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        length: u64,
    ) -> BlobResult<String>;

    /// Public URL of a stored object, or [`BlobError::NotFound`](crate::BlobError::NotFound).
    async fn get(&self, id: &str) -> BlobResult<String>;

    /// Delete a stored object.
    async fn delete(&self, id: &str) -> BlobResult<()>;
}
