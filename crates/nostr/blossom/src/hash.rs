//! Streaming SHA-256 over blob content.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bytes read per digest update.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHash {
    /// Lowercase hex digest, 64 characters.
    pub hex: String,
    pub length: u64,
}

pub fn hash_bytes(bytes: &[u8]) -> BlobHash {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(HASH_CHUNK_SIZE) {
        hasher.update(chunk);
    }
    BlobHash {
        hex: hex::encode(hasher.finalize()),
        length: bytes.len() as u64,
    }
}

/// Hash everything `reader` yields without buffering more than one chunk.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<BlobHash> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut length = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        hasher.update(&buffer[..read]);
        length += read as u64;
    }
    Ok(BlobHash {
        hex: hex::encode(hasher.finalize()),
        length,
    })
}

pub async fn hash_file(path: impl AsRef<Path>) -> std::io::Result<BlobHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut length = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        length += read as u64;
    }
    Ok(BlobHash {
        hex: hex::encode(hasher.finalize()),
        length,
    })
}

/// 64 hex characters, either case.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_digests() {
        assert_eq!(hash_bytes(b"").hex, EMPTY);
        assert_eq!(hash_bytes(b"abc").hex, ABC);
        assert_eq!(hash_bytes(b"abc").length, 3);
    }

    #[test]
    fn reader_matches_in_memory_digest_across_chunks() {
        let data: Vec<u8> = (0..(HASH_CHUNK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let streamed = hash_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(streamed, hash_bytes(&data));
        assert_eq!(streamed.length, data.len() as u64);
    }

    #[tokio::test]
    async fn file_digest_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data = vec![7u8; HASH_CHUNK_SIZE + 1];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).await.unwrap(), hash_bytes(&data));
        assert!(hash_file(dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn hex_shape_check() {
        assert!(is_sha256_hex(EMPTY));
        assert!(is_sha256_hex(&EMPTY.to_ascii_uppercase()));
        assert!(!is_sha256_hex(&EMPTY[..63]));
        assert!(!is_sha256_hex(&format!("{}g", &EMPTY[..63])));
    }
}
