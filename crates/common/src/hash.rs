//! Content addressing for frame and video artifacts
//!
//! Digests are computed over fixed-size chunks so large files are
//! never held in memory, and the same byte sequence always produces
//! the same hex digest on every run and machine.

use blake2::Blake2s256;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read buffer size for streaming file hashing
const CHUNK_SIZE: usize = 8192;

/// Supported 256-bit digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashKind {
    /// BLAKE2s-256, the default content address
    #[default]
    Blake2s256,
    /// SHA-256 alternate
    Sha256,
}

enum HasherState {
    Blake(Box<Blake2s256>),
    Sha(Box<Sha256>),
}

/// Incremental content hasher
pub struct ContentHasher {
    state: HasherState,
}

impl ContentHasher {
    #[must_use]
    pub fn new(kind: HashKind) -> Self {
        let state = match kind {
            HashKind::Blake2s256 => HasherState::Blake(Box::new(Blake2s256::new())),
            HashKind::Sha256 => HasherState::Sha(Box::new(Sha256::new())),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Blake(h) => h.update(data),
            HasherState::Sha(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the hex digest
    #[must_use]
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Blake(h) => hex::encode(h.finalize()),
            HasherState::Sha(h) => hex::encode(h.finalize()),
        }
    }

    /// Hash an in-memory buffer in one pass
    #[must_use]
    pub fn hash_bytes(kind: HashKind, data: &[u8]) -> String {
        let mut hasher = Self::new(kind);
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash a file by streaming it in bounded chunks
    pub fn hash_file(kind: HashKind, path: &Path) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Self::new(kind);
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_bytes_deterministic() {
        let data = b"the same bytes";
        let a = ContentHasher::hash_bytes(HashKind::Blake2s256, data);
        let b = ContentHasher::hash_bytes(HashKind::Blake2s256, data);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // 256 bits as hex
    }

    #[test]
    fn test_differing_buffers_differ() {
        let a = ContentHasher::hash_bytes(HashKind::Blake2s256, b"frame one");
        let b = ContentHasher::hash_bytes(HashKind::Blake2s256, b"frame two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kinds_produce_distinct_digests() {
        let blake = ContentHasher::hash_bytes(HashKind::Blake2s256, b"payload");
        let sha = ContentHasher::hash_bytes(HashKind::Sha256, b"payload");
        assert_ne!(blake, sha);
    }

    #[test]
    fn test_file_matches_bytes() {
        // Larger than one chunk so the streaming path is exercised
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let from_file = ContentHasher::hash_file(HashKind::Blake2s256, file.path()).unwrap();
        let from_bytes = ContentHasher::hash_bytes(HashKind::Blake2s256, &data);
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new(HashKind::Sha256);
        hasher.update(b"split ");
        hasher.update(b"input");
        let incremental = hasher.finalize();
        let one_shot = ContentHasher::hash_bytes(HashKind::Sha256, b"split input");
        assert_eq!(incremental, one_shot);
    }
}
