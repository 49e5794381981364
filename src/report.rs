//! Immutable result model for one reconciliation run.
//!
//! A [`Report`] is built once by the reconciler and read-only thereafter.
//! It distinguishes "content differs" (Mismatch) from "could not verify"
//! (Error); an operator auditing backup integrity needs to know which files
//! are confirmed divergent versus which need manual attention.

use crate::util::hashing::hash_field;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Which of the two compared trees a unique file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Verdict for a relative path present in both trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CommonOutcome {
    /// Both digests computed and equal.
    Match,
    /// Both digests computed and unequal.
    Mismatch,
    /// At least one side could not be digested. Content equality cannot be
    /// asserted from a partial read, so a single failure forces this variant
    /// regardless of the other side's success.
    Error { cause: String },
}

/// A file present in exactly one tree. The digest is best-effort; `None`
/// means digesting failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueFile {
    pub path: String,
    pub digest: Option<String>,
}

/// Outcome of comparing two tree indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    common: BTreeMap<String, CommonOutcome>,
    unique_left: Vec<UniqueFile>,
    unique_right: Vec<UniqueFile>,
}

impl Report {
    pub(crate) fn new(
        common: BTreeMap<String, CommonOutcome>,
        mut unique_left: Vec<UniqueFile>,
        mut unique_right: Vec<UniqueFile>,
    ) -> Self {
        unique_left.sort_by(|a, b| a.path.cmp(&b.path));
        unique_right.sort_by(|a, b| a.path.cmp(&b.path));
        Report {
            common,
            unique_left,
            unique_right,
        }
    }

    #[allow(dead_code)]
    pub fn common_count(&self) -> usize {
        self.common.len()
    }

    pub fn matched_count(&self) -> usize {
        self.common
            .values()
            .filter(|o| matches!(o, CommonOutcome::Match))
            .count()
    }

    pub fn mismatched_count(&self) -> usize {
        self.mismatched_paths().count()
    }

    pub fn errored_count(&self) -> usize {
        self.errored_paths().count()
    }

    /// Common paths whose content differs, in lexicographic order.
    pub fn mismatched_paths(&self) -> impl Iterator<Item = &str> {
        self.common.iter().filter_map(|(path, outcome)| {
            matches!(outcome, CommonOutcome::Mismatch).then_some(path.as_str())
        })
    }

    /// Common paths that could not be verified, in lexicographic order.
    pub fn errored_paths(&self) -> impl Iterator<Item = &str> {
        self.common.iter().filter_map(|(path, outcome)| {
            matches!(outcome, CommonOutcome::Error { .. }).then_some(path.as_str())
        })
    }

    /// Per-path outcomes for every common path, in lexicographic order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &CommonOutcome)> {
        self.common
            .iter()
            .map(|(path, outcome)| (path.as_str(), outcome))
    }

    /// Files present only in the given tree, sorted by path.
    pub fn unique_to(&self, side: Side) -> &[UniqueFile] {
        match side {
            Side::Left => &self.unique_left,
            Side::Right => &self.unique_right,
        }
    }

    /// True iff no mismatches, no errors, and no unique files on either side.
    pub fn is_identical(&self) -> bool {
        self.unique_left.is_empty()
            && self.unique_right.is_empty()
            && self
                .common
                .values()
                .all(|o| matches!(o, CommonOutcome::Match))
    }

    /// A unique fingerprint representing the set of differences.
    ///
    /// Base64-encoded SHA-256 over a canonical encoding of every non-Match
    /// entry. Matched paths and error causes do not contribute, so two runs
    /// that found the same differences produce the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for (path, outcome) in &self.common {
            let code = match outcome {
                CommonOutcome::Match => continue,
                CommonOutcome::Mismatch => "M",
                CommonOutcome::Error { .. } => "E",
            };
            hash_field(&mut hasher, path.as_bytes());
            hash_field(&mut hasher, code.as_bytes());
        }

        for unique in &self.unique_left {
            hash_field(&mut hasher, unique.path.as_bytes());
            hash_field(&mut hasher, b"<");
        }

        for unique in &self.unique_right {
            hash_field(&mut hasher, unique.path.as_bytes());
            hash_field(&mut hasher, b">");
        }

        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }
}
