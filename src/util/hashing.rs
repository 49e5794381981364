//! Canonical hashing helpers for stable fingerprints.
//!
//! Provides a canonical encoding for byte fields used by fingerprint
//! construction.

use sha2::{Digest, Sha256};

/// Hashes a byte field with an explicit length prefix.
///
/// Length-prefixing avoids delimiter ambiguities (for example embedded `|` or
/// newlines) that can otherwise make distinct data serialize to identical byte
/// streams before hashing.
pub(crate) fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}
