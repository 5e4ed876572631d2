//! Physical archive moves.
//!
//! Invoked only as the side effect of an `archived` transition, after the
//! ledger has durably recorded it. The caller rolls the transition back if
//! the move fails, so these functions never touch the ledger themselves.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on `name-N.ext` collision suffixes before giving up.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Pick a destination path in `dest_dir` that does not collide with an
/// existing file: `name.ext`, then `name-1.ext` up to `name-9999.ext`.
pub fn unique_destination(dest_dir: &Path, filename: &str) -> io::Result<PathBuf> {
    let candidate = dest_dir.join(filename);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    for i in 1..MAX_COLLISION_SUFFIX {
        let candidate = dest_dir.join(format!("{stem}-{i}{ext}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no unique destination for '{filename}' in {}", dest_dir.display()),
    ))
}

/// Move `src` into `dest_dir` under a collision-safe name and return the
/// final destination path.
///
/// Uses `rename` when source and destination share a filesystem, falling
/// back to copy-then-remove across devices. A half-finished fallback is
/// cleaned up so a failure leaves the source file in place.
pub fn move_into(src: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;

    let filename = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("source has no usable file name: {}", src.display()),
            )
        })?;

    let dest = unique_destination(dest_dir, filename)?;

    match fs::rename(src, &dest) {
        Ok(()) => Ok(dest),
        Err(rename_err) => {
            // Cross-device moves (watched folder and archive on different
            // mounts) cannot rename; copy then remove.
            fs::copy(src, &dest).map_err(|copy_err| {
                io::Error::new(
                    copy_err.kind(),
                    format!("copy after failed rename ({rename_err}): {copy_err}"),
                )
            })?;
            if let Err(remove_err) = fs::remove_file(src) {
                let _ = fs::remove_file(&dest);
                return Err(remove_err);
            }
            Ok(dest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn move_places_file_under_original_name() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("drop").join("report.pdf");
        let archive = temp.path().join("archive");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, "pdf bytes").unwrap();

        let dest = move_into(&src, &archive).unwrap();
        assert_eq!(dest, archive.join("report.pdf"));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"pdf bytes");
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive");
        fs::create_dir_all(&archive).unwrap();
        fs::write(archive.join("a.txt"), "already there").unwrap();
        fs::write(archive.join("a-1.txt"), "also there").unwrap();

        let src = temp.path().join("a.txt");
        fs::write(&src, "incoming").unwrap();

        let dest = move_into(&src, &archive).unwrap();
        assert_eq!(dest, archive.join("a-2.txt"));
        assert_eq!(fs::read(&dest).unwrap(), b"incoming");
    }

    #[test]
    fn extensionless_names_collide_cleanly() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive");
        fs::create_dir_all(&archive).unwrap();
        fs::write(archive.join("README"), "x").unwrap();

        let dest = unique_destination(&archive, "README").unwrap();
        assert_eq!(dest, archive.join("README-1"));
    }

    #[test]
    fn copy_fallback_failure_reports_the_copy_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive");
        let src = temp.path().join("ghost.txt");

        // Rename and the copy fallback both fail; the error must describe
        // the copy attempt, not just the rename.
        let err = move_into(&src, &archive).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("copy"), "got {err}");
    }

    #[test]
    fn unwritable_destination_leaves_source_in_place() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("keep.txt");
        fs::write(&src, "do not lose").unwrap();

        // A regular file where the archive directory should be makes
        // create_dir_all fail.
        let blocked = temp.path().join("archive");
        fs::write(&blocked, "i am a file").unwrap();

        assert!(move_into(&src, &blocked).is_err());
        assert!(src.exists());
    }
}
