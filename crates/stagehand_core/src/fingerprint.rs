//! Content fingerprinting.
//!
//! A file's identity is its `(blake3 hash, byte size)` pair, so identical
//! content at two paths fingerprints identically and a renamed file keeps
//! its identity.

use stagehand_db::Identity;
use std::fs::File;
use std::io;
use std::path::Path;

/// Read a file and compute its content identity.
///
/// Returns the underlying IO error if the file vanished between settlement
/// and the read; callers drop the event in that case.
pub fn fingerprint_file(path: &Path) -> io::Result<Identity> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut file, &mut hasher)?;

    Ok(Identity {
        hash: hasher.finalize().to_hex().to_string(),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn identical_content_at_different_paths_shares_identity() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.bin");
        let b = temp.path().join("nested").join("b.bin");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        let fp_a = fingerprint_file(&a).unwrap();
        let fp_b = fingerprint_file(&b).unwrap();
        assert_eq!(fp_a, fp_b);
        assert_eq!(fp_a.size, 10);
    }

    #[test]
    fn different_content_differs() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.bin");
        let b = temp.path().join("b.bin");
        fs::write(&a, b"one").unwrap();
        fs::write(&b, b"two").unwrap();

        assert_ne!(
            fingerprint_file(&a).unwrap().hash,
            fingerprint_file(&b).unwrap().hash
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let temp = TempDir::new().unwrap();
        let err = fingerprint_file(&temp.path().join("gone.txt")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
