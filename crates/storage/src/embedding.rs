//! Embedding artifact packing
//!
//! Each accepted frame's feature vector is stored next to the frame
//! image as a MessagePack object keyed `"clip-feature-vector"`, whose
//! value is a matrix with a single row. The artifact's object key is
//! derived from the frame key by swapping the extension for
//! `_embedding.msgpack`.

use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};

/// Serialized embedding payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingArtifact {
    #[serde(rename = "clip-feature-vector")]
    pub clip_feature_vector: Vec<Vec<f32>>,
}

/// Pack one feature vector into the MessagePack artifact format
pub fn pack_embedding(vector: &[f32]) -> StorageResult<Vec<u8>> {
    let artifact = EmbeddingArtifact {
        clip_feature_vector: vec![vector.to_vec()],
    };
    rmp_serde::to_vec_named(&artifact).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Unpack a MessagePack artifact back into its feature vector
pub fn unpack_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
    let artifact: EmbeddingArtifact =
        rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    artifact
        .clip_feature_vector
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::Serialization("artifact holds no vector".to_string()))
}

/// Derive the embedding object key for a frame object key
///
/// `frames/vid/00001.jpg` becomes `frames/vid/00001_embedding.msgpack`.
#[must_use]
pub fn embedding_key_for(frame_key: &str) -> String {
    let stem = match frame_key.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => frame_key,
    };
    format!("{stem}_embedding.msgpack")
}
