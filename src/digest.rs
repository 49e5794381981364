use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read buffer size. Bounds peak memory per file regardless of file size.
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("File modified during digesting: {0}")]
    ConcurrentModification(PathBuf),
}

/// Computes the hex-encoded SHA-256 digest of a file's content.
///
/// # Behavior
/// - Records the file's modification time before reading
/// - Reads the file in fixed-size chunks and feeds them into SHA-256
/// - Verifies the modification time hasn't changed after reading
/// - Returns an error if the file was modified during digesting
///
/// The digest is a pure function of the file's bytes; path and mtime never
/// feed the hash.
///
/// # Errors
/// - `DigestError::Io`: File doesn't exist, is a directory, or other I/O errors
/// - `DigestError::PermissionDenied`: Insufficient permissions to read the file
/// - `DigestError::ConcurrentModification`: File was detected as being modified
///   while digesting. Note that the absence of this error is *not* a guarantee
///   that the file was *not* modified.
pub fn digest_file(path: &Path) -> Result<String, DigestError> {
    let metadata_before = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            DigestError::PermissionDenied(path.to_path_buf())
        } else {
            DigestError::Io(e)
        }
    })?;
    let mtime_before = metadata_before.modified().map_err(DigestError::Io)?;

    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            DigestError::PermissionDenied(path.to_path_buf())
        } else {
            DigestError::Io(e)
        }
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(DigestError::Io)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let metadata_after = std::fs::metadata(path).map_err(DigestError::Io)?;
    let mtime_after = metadata_after.modified().map_err(DigestError::Io)?;

    if mtime_before != mtime_after {
        return Err(DigestError::ConcurrentModification(path.to_path_buf()));
    }

    let digest = format!("{:x}", hasher.finalize());

    debug!("Digest of {} is {}", path.display(), digest);

    Ok(digest)
}
