//! Frame persistence
//!
//! For each accepted frame this uploads two objects into the frame
//! bucket: the JPEG itself and its packed embedding artifact. Both
//! uploads are existence-checked first, so re-running a video never
//! duplicates work or bytes. Object keys are derived from the source
//! video's storage path, keeping all of a video's frames under one
//! prefix.

use frame_ingest_common::{separate_bucket_and_object, AcceptedFrame};
use frame_ingest_storage::{
    embedding_key_for, pack_embedding, EncoderInput, ImageEncoder, ObjectStorage, StorageResult,
};
use std::sync::Arc;
use tracing::debug;

/// Frame object prefix for a bucket-qualified video path
///
/// `ingress-video/S_570/vid-1.mp4` -> `S_570/vid-1`
#[must_use]
pub fn frame_prefix_for(video_file_path: &str) -> String {
    let (_bucket, object) = separate_bucket_and_object(video_file_path);
    match object.rsplit_once('.') {
        Some((stem, _ext)) => stem.to_string(),
        None => object,
    }
}

/// Object key for the nth accepted frame under a prefix
#[must_use]
pub fn frame_key_for(prefix: &str, index: usize) -> String {
    format!("{prefix}/{index:05}.jpg")
}

/// Uploads one frame and its embedding artifact
pub struct FramePersister {
    storage: Arc<dyn ObjectStorage>,
    encoder: Arc<dyn ImageEncoder>,
    frame_bucket: String,
}

impl FramePersister {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        encoder: Arc<dyn ImageEncoder>,
        frame_bucket: String,
    ) -> Self {
        Self {
            storage,
            encoder,
            frame_bucket,
        }
    }

    /// Persist one frame, returning `true` when the JPEG was newly uploaded
    ///
    /// The embedding is computed from the saved frame bytes so the
    /// stored artifact always matches the stored image exactly.
    pub async fn persist(
        &self,
        frame: &AcceptedFrame,
        prefix: &str,
        index: usize,
    ) -> StorageResult<bool> {
        let frame_key = frame_key_for(prefix, index);
        let bytes = tokio::fs::read(&frame.local_path).await?;

        let vector = self
            .encoder
            .encode(EncoderInput::RawBytes(bytes.clone()))
            .await?;
        let artifact = pack_embedding(&vector)?;

        let uploaded = self
            .storage
            .store_if_absent(&self.frame_bucket, &frame_key, &bytes)
            .await?;
        self.storage
            .store_if_absent(&self.frame_bucket, &embedding_key_for(&frame_key), &artifact)
            .await?;

        debug!(
            frame_number = frame.frame_number,
            key = %frame_key,
            uploaded,
            "persisted frame"
        );
        Ok(uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_ingest_common::Resolution;
    use frame_ingest_storage::{unpack_embedding, StorageError};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// In-memory object storage counting every real upload
    #[derive(Default)]
    pub struct MemoryStorage {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        pub uploads: Mutex<usize>,
    }

    impl MemoryStorage {
        fn full_key(bucket: &str, key: &str) -> String {
            format!("{bucket}/{key}")
        }

        pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(&Self::full_key(bucket, key))
                .cloned()
        }
    }

    #[async_trait::async_trait]
    impl ObjectStorage for MemoryStorage {
        async fn store_file(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()> {
            *self.uploads.lock().unwrap() += 1;
            self.objects
                .lock()
                .unwrap()
                .insert(Self::full_key(bucket, key), data.to_vec());
            Ok(())
        }

        async fn store_file_from_path(
            &self,
            bucket: &str,
            key: &str,
            path: &Path,
        ) -> StorageResult<()> {
            let data = std::fs::read(path)?;
            self.store_file(bucket, key, &data).await
        }

        async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .contains_key(&Self::full_key(bucket, key)))
        }

        async fn download_to_path(
            &self,
            bucket: &str,
            key: &str,
            path: &Path,
        ) -> StorageResult<bool> {
            if path.is_file() {
                return Ok(false);
            }
            let data = self
                .get(bucket, key)
                .ok_or_else(|| StorageError::NotFound(Self::full_key(bucket, key)))?;
            std::fs::write(path, data)?;
            Ok(true)
        }
    }

    struct FixedEncoder(Vec<f32>);

    #[async_trait::async_trait]
    impl ImageEncoder for FixedEncoder {
        async fn encode(&self, _input: EncoderInput) -> StorageResult<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn sample_frame(dir: &Path) -> AcceptedFrame {
        let local_path = dir.join("00000.jpg");
        std::fs::write(&local_path, b"jpeg bytes").unwrap();
        AcceptedFrame {
            frame_number: 12,
            content_hash: "deadbeef".to_string(),
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            image_format: "JPEG".to_string(),
            local_path,
            video_id: "vid-1".to_string(),
        }
    }

    #[test]
    fn test_frame_prefix_derivation() {
        assert_eq!(frame_prefix_for("ingress-video/S_570/vid-1.mp4"), "S_570/vid-1");
        assert_eq!(frame_key_for("S_570/vid-1", 3), "S_570/vid-1/00003.jpg");
    }

    #[tokio::test]
    async fn test_persist_uploads_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let persister = FramePersister::new(
            Arc::clone(&storage) as Arc<dyn ObjectStorage>,
            Arc::new(FixedEncoder(vec![0.5, -0.5])),
            "external".to_string(),
        );

        let frame = sample_frame(dir.path());
        let uploaded = persister.persist(&frame, "S_570/vid-1", 0).await.unwrap();
        assert!(uploaded);

        assert_eq!(
            storage.get("external", "S_570/vid-1/00000.jpg").unwrap(),
            b"jpeg bytes"
        );
        let artifact = storage
            .get("external", "S_570/vid-1/00000_embedding.msgpack")
            .unwrap();
        assert_eq!(unpack_embedding(&artifact).unwrap(), vec![0.5, -0.5]);
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let persister = FramePersister::new(
            Arc::clone(&storage) as Arc<dyn ObjectStorage>,
            Arc::new(FixedEncoder(vec![1.0])),
            "external".to_string(),
        );

        let frame = sample_frame(dir.path());
        assert!(persister.persist(&frame, "p", 0).await.unwrap());
        assert!(!persister.persist(&frame, "p", 0).await.unwrap());

        // Second pass uploaded nothing at all
        assert_eq!(*storage.uploads.lock().unwrap(), 2);
    }
}
