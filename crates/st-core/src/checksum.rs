//! SHA-256 checksum utilities for partition files and fingerprints.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Compute SHA256 checksum of a string
pub fn compute_checksum(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Compute SHA256 checksum of a file's contents, streaming it from disk
pub fn file_checksum(path: &Path) -> CoreResult<String> {
    let file = File::open(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_checksum_is_stable() {
        let a = compute_checksum("sales|2024-03");
        let b = compute_checksum("sales|2024-03");
        let c = compute_checksum("sales|2024-04");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_file_checksum_matches_string_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        std::fs::write(&path, "hello partition").unwrap();
        assert_eq!(
            file_checksum(&path).unwrap(),
            compute_checksum("hello partition")
        );
    }

    #[test]
    fn test_file_checksum_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_checksum(&dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, CoreError::IoWithPath { .. }));
    }
}
