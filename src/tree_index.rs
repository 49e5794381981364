//! Recursive tree indexing for the treesame comparison tool.
//!
//! This module walks a root directory and produces a mapping from
//! relative path (forward-slash separated on every platform) to absolute
//! path, for every regular file found. Symlinks and other non-regular
//! entries are skipped and counted; unreadable subdirectories are skipped
//! and counted rather than failing the whole scan.

use std::collections::BTreeMap;
use std::fs::ReadDir;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

/// Index of one tree: relative path -> absolute path for every regular file.
///
/// Keys never contain the root prefix and never start with a separator.
/// The index is a snapshot; absolute paths may go stale after the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeIndex {
    root: PathBuf,
    entries: BTreeMap<String, PathBuf>,
    skipped_dirs: usize,
    skipped_special: usize,
}

impl TreeIndex {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&Path> {
        self.entries.get(relative_path).map(PathBuf::as_path)
    }

    /// Relative paths in lexicographic order.
    #[allow(dead_code)]
    pub fn relative_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries as (relative path, absolute path) pairs, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .map(|(relative, absolute)| (relative.as_str(), absolute.as_path()))
    }

    /// Number of subdirectories that could not be entered and were skipped.
    pub fn skipped_dirs(&self) -> usize {
        self.skipped_dirs
    }

    /// Number of non-regular entries (symlinks, FIFOs, devices, sockets)
    /// that were skipped.
    pub fn skipped_special(&self) -> usize {
        self.skipped_special
    }
}

/// Recursively indexes every regular file under `root`.
///
/// # Errors
///
/// Fails only when the root itself cannot be scanned:
/// * `IndexError::NotADirectory`: `root` exists but is not a directory
/// * `IndexError::PermissionDenied`: `root` cannot be opened for listing
/// * `IndexError::Io`: `root` is missing or another I/O error occurred
///
/// Unreadable *sub*directories never fail the call; they are skipped and
/// surfaced through [`TreeIndex::skipped_dirs`].
pub fn build_index(root: &Path) -> Result<TreeIndex, IndexError> {
    let root = root.canonicalize().map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            IndexError::PermissionDenied(root.to_path_buf())
        } else {
            IndexError::Io(e)
        }
    })?;

    let metadata = std::fs::metadata(&root).map_err(IndexError::Io)?;
    if !metadata.is_dir() {
        return Err(IndexError::NotADirectory(root));
    }

    // The root is opened eagerly so an unreadable root fails the call
    // instead of being skipped like an inner directory.
    let read_dir = std::fs::read_dir(&root).map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            IndexError::PermissionDenied(root.clone())
        } else {
            IndexError::Io(e)
        }
    })?;

    let mut index = TreeIndex {
        root: root.clone(),
        entries: BTreeMap::new(),
        skipped_dirs: 0,
        skipped_special: 0,
    };

    visit_entries(read_dir, &root, "", &mut index);

    debug!(
        "Indexed {} files under {} ({} dirs skipped, {} special entries skipped)",
        index.len(),
        root.display(),
        index.skipped_dirs,
        index.skipped_special
    );

    Ok(index)
}

fn visit_directory(dir: &Path, prefix: &str, index: &mut TreeIndex) {
    match std::fs::read_dir(dir) {
        Ok(read_dir) => visit_entries(read_dir, dir, prefix, index),
        Err(e) => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            index.skipped_dirs += 1;
        }
    }
}

fn visit_entries(read_dir: ReadDir, dir: &Path, prefix: &str, index: &mut TreeIndex) {
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error while listing {}: {}", dir.display(), e);
                index.skipped_dirs += 1;
                continue;
            }
        };
        let path = entry.path();

        // Forward slashes on every platform so keys compare across trees.
        // Non-UTF-8 names degrade via lossy conversion.
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let relative_path = if prefix.is_empty() {
            name.into_owned()
        } else {
            format!("{prefix}/{name}")
        };

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping vanished entry {}: {}", path.display(), e);
                continue;
            }
        };

        let file_type = metadata.file_type();

        if file_type.is_symlink() || !(file_type.is_dir() || file_type.is_file()) {
            debug!("Skipping non-regular entry {}", path.display());
            index.skipped_special += 1;
        } else if file_type.is_dir() {
            visit_directory(&path, &relative_path, index);
        } else {
            index.entries.insert(relative_path, path);
        }
    }
}
