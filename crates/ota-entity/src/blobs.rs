use tokio::io::AsyncRead;
use tracing::{debug, warn};

use ota_backend::BlobError;
use ota_types::{StorageError, StorageResult};

use crate::store::EntityStore;

fn blob_err(e: BlobError) -> StorageError {
    match e {
        BlobError::NotFound(id) => StorageError::NotFound(Some(format!("blob {id}"))),
        other => StorageError::Blob(other.to_string()),
    }
}

impl EntityStore {
    /// Upload `length` bytes under `blob_id` and record the returned URL.
    pub async fn add_blob(
        &self,
        blob_id: &str,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        length: u64,
    ) -> StorageResult<String> {
        let url = self
            .blob_store
            .put(blob_id, stream, length)
            .await
            .map_err(blob_err)?;

        let mut graph = self.write_graph()?;
        graph.blobs.insert(blob_id.to_string(), url);
        self.schedule_save(&graph);
        debug!(blob_id, bytes = length, "blob added");
        Ok(blob_id.to_string())
    }

    pub async fn get_blob_url(&self, blob_id: &str) -> StorageResult<String> {
        self.read_graph()?
            .blobs
            .get(blob_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(Some("Blob not found".into())))
    }

    /// Delete the stored bytes, then drop the URL mapping.
    ///
    /// The mapping stays when the blob store refuses the delete.
    pub async fn remove_blob(&self, blob_id: &str) -> StorageResult<()> {
        if let Err(e) = self.blob_store.delete(blob_id).await {
            warn!(blob_id, error = %e, "blob delete failed; keeping mapping");
            return Err(blob_err(e));
        }

        let mut graph = self.write_graph()?;
        graph.blobs.remove(blob_id);
        self.schedule_save(&graph);
        debug!(blob_id, "blob removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::fixture;
    use ota_types::{ErrorCode, StorageError};

    #[tokio::test]
    async fn add_records_url() {
        let f = fixture();
        let mut data: &[u8] = b"bundle-bytes";
        let id = f.store.add_blob("blob-1", &mut data, 12).await.unwrap();
        assert_eq!(id, "blob-1");
        assert_eq!(
            f.store.get_blob_url("blob-1").await.unwrap(),
            "https://blobs.test/blob-1"
        );
        assert_eq!(f.blobs.len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_records_nothing() {
        let f = fixture();
        let mut data: &[u8] = b"short";
        let err = f.store.add_blob("blob-1", &mut data, 99).await.unwrap_err();
        assert!(matches!(err, StorageError::Blob(_)));
        assert!(f.store.get_blob_url("blob-1").await.is_err());
    }

    #[tokio::test]
    async fn remove_drops_bytes_and_mapping() {
        let f = fixture();
        let mut data: &[u8] = b"x";
        f.store.add_blob("b", &mut data, 1).await.unwrap();
        f.store.remove_blob("b").await.unwrap();
        assert!(f.blobs.is_empty());
        let err = f.store.get_blob_url("b").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn failed_delete_keeps_mapping() {
        let f = fixture();
        let mut data: &[u8] = b"x";
        f.store.add_blob("b", &mut data, 1).await.unwrap();
        f.blobs.fail_deletes(true);

        assert!(f.store.remove_blob("b").await.is_err());
        assert_eq!(
            f.store.get_blob_url("b").await.unwrap(),
            "https://blobs.test/b"
        );
    }

    #[tokio::test]
    async fn delete_of_unknown_blob_keeps_mapping() {
        let f = fixture();
        f.store
            .write_graph()
            .unwrap()
            .blobs
            .insert("orphan".into(), "https://blobs.test/orphan".into());
        let err = f.store.remove_blob("orphan").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert!(f.store.get_blob_url("orphan").await.is_ok());
    }
}
