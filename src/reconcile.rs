//! Reconciliation of two tree indexes into a comparison report.
//!
//! Partitions the relative-path key sets into {unique-left, unique-right,
//! common}, digests every path over a bounded worker pool, and classifies
//! each common path as Match, Mismatch, or Error. Per-file failures become
//! report data; the reconciler itself never fails.

use crate::digest::digest_file;
use crate::report::{CommonOutcome, Report, Side, UniqueFile};
use crate::tree_index::TreeIndex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use tracing::debug;

pub struct ReconcileOptions {
    /// Number of digest worker threads. Clamped to at least 1 and to the
    /// number of tasks. Bounds concurrent open file descriptors and disk
    /// contention.
    pub jobs: usize,
    /// Cooperative cancellation flag. Once set, queued common paths are
    /// reported as Error (indeterminate) and queued unique paths get no
    /// digest; nothing is silently dropped.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            jobs: default_jobs(),
            cancel: None,
        }
    }
}

/// Available parallelism capped at 8. Digesting is I/O bound; more threads
/// than that mostly adds disk contention.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

enum Task<'a> {
    Common {
        path: &'a str,
        left_absolute: &'a Path,
        right_absolute: &'a Path,
    },
    Unique {
        side: Side,
        path: &'a str,
        absolute: &'a Path,
    },
}

enum TaskResult {
    Common { path: String, outcome: CommonOutcome },
    Unique { side: Side, file: UniqueFile },
}

/// Compares two indexes and produces a [`Report`].
///
/// Every digest unit (one common pair, or one unique file) is an independent
/// task with no ordering dependency on any other path; tasks are distributed
/// across `options.jobs` worker threads. The indexes are only read, so
/// workers share them freely.
///
/// A failed digest never aborts the run: a common path with a failed side
/// classifies as Error, a unique path keeps a `None` digest.
pub fn reconcile(left: &TreeIndex, right: &TreeIndex, options: &ReconcileOptions) -> Report {
    let mut tasks: Vec<Task> = Vec::with_capacity(left.len() + right.len());

    for (path, left_absolute) in left.iter() {
        match right.get(path) {
            Some(right_absolute) => tasks.push(Task::Common {
                path,
                left_absolute,
                right_absolute,
            }),
            None => tasks.push(Task::Unique {
                side: Side::Left,
                path,
                absolute: left_absolute,
            }),
        }
    }
    for (path, right_absolute) in right.iter() {
        if left.get(path).is_none() {
            tasks.push(Task::Unique {
                side: Side::Right,
                path,
                absolute: right_absolute,
            });
        }
    }

    let worker_count = options.jobs.clamp(1, tasks.len().max(1));

    debug!(
        "Reconciling {} paths ({} common) with {} workers",
        tasks.len(),
        left.len() + right.len() - tasks.len(),
        worker_count
    );

    let next_task = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    let mut common = BTreeMap::new();
    let mut unique_left = Vec::new();
    let mut unique_right = Vec::new();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let tasks = &tasks;
            let next_task = &next_task;
            let cancel = options.cancel.as_deref();

            scope.spawn(move || {
                loop {
                    let i = next_task.fetch_add(1, Ordering::Relaxed);
                    let Some(task) = tasks.get(i) else {
                        break;
                    };
                    let cancelled = cancel.is_some_and(|flag| flag.load(Ordering::Relaxed));
                    if tx.send(run_task(task, cancelled)).is_err() {
                        break;
                    }
                }
            });
        }

        // All senders must drop for the receive loop to terminate.
        drop(tx);

        for result in rx {
            match result {
                TaskResult::Common { path, outcome } => {
                    common.insert(path, outcome);
                }
                TaskResult::Unique {
                    side: Side::Left,
                    file,
                } => unique_left.push(file),
                TaskResult::Unique {
                    side: Side::Right,
                    file,
                } => unique_right.push(file),
            }
        }
    });

    Report::new(common, unique_left, unique_right)
}

fn run_task(task: &Task, cancelled: bool) -> TaskResult {
    match task {
        Task::Common {
            path,
            left_absolute,
            right_absolute,
        } => {
            let outcome = if cancelled {
                CommonOutcome::Error {
                    cause: "cancelled before verification".to_string(),
                }
            } else {
                classify_common(left_absolute, right_absolute)
            };
            TaskResult::Common {
                path: path.to_string(),
                outcome,
            }
        }
        Task::Unique {
            side,
            path,
            absolute,
        } => {
            let digest = if cancelled {
                None
            } else {
                digest_file(absolute)
                    .inspect_err(|e| debug!("No digest for unique file {}: {}", path, e))
                    .ok()
            };
            TaskResult::Unique {
                side: *side,
                file: UniqueFile {
                    path: path.to_string(),
                    digest,
                },
            }
        }
    }
}

fn classify_common(left_absolute: &Path, right_absolute: &Path) -> CommonOutcome {
    match (digest_file(left_absolute), digest_file(right_absolute)) {
        (Ok(left), Ok(right)) if left == right => CommonOutcome::Match,
        (Ok(_), Ok(_)) => CommonOutcome::Mismatch,
        (Err(e), Ok(_)) => CommonOutcome::Error {
            cause: format!("left: {e}"),
        },
        (Ok(_), Err(e)) => CommonOutcome::Error {
            cause: format!("right: {e}"),
        },
        (Err(left), Err(right)) => CommonOutcome::Error {
            cause: format!("left: {left}; right: {right}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_index::build_index;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (relative, content) in files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
    }

    fn reconcile_trees(left_files: &[(&str, &str)], right_files: &[(&str, &str)]) -> Report {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), left_files);
        write_tree(right_dir.path(), right_files);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();
        reconcile(&left, &right, &ReconcileOptions::default())
    }

    fn assert_count_invariants(report: &Report, left: &TreeIndex, right: &TreeIndex) {
        assert_eq!(
            report.matched_count() + report.mismatched_count() + report.errored_count(),
            report.common_count()
        );
        assert_eq!(
            report.unique_to(Side::Left).len() + report.common_count(),
            left.len()
        );
        assert_eq!(
            report.unique_to(Side::Right).len() + report.common_count(),
            right.len()
        );
    }

    #[test]
    fn identical_trees_match_everywhere() {
        let files = [
            ("a.txt", "alpha"),
            ("nested/b.txt", "beta"),
            ("nested/deep/c.txt", "gamma"),
        ];
        let report = reconcile_trees(&files, &files);

        assert!(report.is_identical());
        assert_eq!(report.matched_count(), 3);
        assert_eq!(report.mismatched_count(), 0);
        assert_eq!(report.errored_count(), 0);
        assert!(report.unique_to(Side::Left).is_empty());
        assert!(report.unique_to(Side::Right).is_empty());
    }

    #[test]
    fn empty_trees_yield_empty_identical_report() {
        let report = reconcile_trees(&[], &[]);

        assert!(report.is_identical());
        assert_eq!(report.common_count(), 0);
        assert!(report.unique_to(Side::Left).is_empty());
        assert!(report.unique_to(Side::Right).is_empty());
    }

    #[test]
    fn equal_content_matches_and_case_difference_mismatches() {
        let report = reconcile_trees(
            &[("same.txt", "hello"), ("diff.txt", "hello")],
            &[("same.txt", "hello"), ("diff.txt", "hellO")],
        );

        assert_eq!(report.matched_count(), 1);
        assert_eq!(
            report.mismatched_paths().collect::<Vec<_>>(),
            vec!["diff.txt"]
        );
        assert_eq!(report.errored_count(), 0);
    }

    #[test]
    fn partition_scenario() {
        // A has {x: "1", y: "2"}, B has {y: "2", z: "3"}.
        let report = reconcile_trees(&[("x", "1"), ("y", "2")], &[("y", "2"), ("z", "3")]);

        assert_eq!(report.matched_count(), 1);
        assert_eq!(report.mismatched_count(), 0);
        assert_eq!(report.errored_count(), 0);
        assert_eq!(
            report
                .unique_to(Side::Left)
                .iter()
                .map(|u| u.path.as_str())
                .collect::<Vec<_>>(),
            vec!["x"]
        );
        assert_eq!(
            report
                .unique_to(Side::Right)
                .iter()
                .map(|u| u.path.as_str())
                .collect::<Vec<_>>(),
            vec!["z"]
        );
    }

    #[test]
    fn count_invariants_hold() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(
            left_dir.path(),
            &[("a", "1"), ("b", "2"), ("sub/c", "3"), ("sub/d", "4")],
        );
        write_tree(
            right_dir.path(),
            &[("b", "changed"), ("sub/c", "3"), ("e", "5")],
        );

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();
        let report = reconcile(&left, &right, &ReconcileOptions::default());

        assert_count_invariants(&report, &left, &right);
    }

    #[test]
    fn file_deleted_after_indexing_is_error_not_mismatch() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("f.txt", "content")]);
        write_tree(right_dir.path(), &[("f.txt", "content")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        fs::remove_file(right_dir.path().join("f.txt")).unwrap();

        let report = reconcile(&left, &right, &ReconcileOptions::default());

        assert_eq!(report.mismatched_count(), 0);
        assert_eq!(report.errored_paths().collect::<Vec<_>>(), vec!["f.txt"]);
        let (_, outcome) = report.outcomes().next().unwrap();
        match outcome {
            CommonOutcome::Error { cause } => {
                assert!(!cause.is_empty());
                assert!(cause.starts_with("right:"));
            }
            other => panic!("Expected error outcome, got {other:?}"),
        }
    }

    #[test]
    fn unique_file_digest_is_best_effort() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("only.txt", "hello")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let report = reconcile(&left, &right, &ReconcileOptions::default());

        let uniques = report.unique_to(Side::Left);
        assert_eq!(uniques.len(), 1);
        assert_eq!(
            uniques[0].digest.as_deref(),
            // sha256 of "hello"
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn unique_file_deleted_after_indexing_keeps_record_without_digest() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("only.txt", "hello")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        fs::remove_file(left_dir.path().join("only.txt")).unwrap();

        let report = reconcile(&left, &right, &ReconcileOptions::default());

        let uniques = report.unique_to(Side::Left);
        assert_eq!(uniques.len(), 1);
        assert_eq!(uniques[0].path, "only.txt");
        assert!(uniques[0].digest.is_none());
        assert_count_invariants(&report, &left, &right);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("a", "1"), ("b", "2"), ("c", "3")]);
        write_tree(right_dir.path(), &[("a", "1"), ("b", "other"), ("d", "4")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let first = reconcile(&left, &right, &ReconcileOptions::default());
        let second = reconcile(&left, &right, &ReconcileOptions::default());

        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn swapping_inputs_swaps_unique_sides() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("a", "1"), ("both", "x"), ("m", "1")]);
        write_tree(right_dir.path(), &[("b", "2"), ("both", "x"), ("m", "2")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let forward = reconcile(&left, &right, &ReconcileOptions::default());
        let backward = reconcile(&right, &left, &ReconcileOptions::default());

        assert_eq!(
            forward.unique_to(Side::Left),
            backward.unique_to(Side::Right)
        );
        assert_eq!(
            forward.unique_to(Side::Right),
            backward.unique_to(Side::Left)
        );
        assert_eq!(
            forward.mismatched_paths().collect::<Vec<_>>(),
            backward.mismatched_paths().collect::<Vec<_>>()
        );
        assert_eq!(forward.matched_count(), backward.matched_count());
    }

    #[test]
    fn single_worker_and_many_workers_agree() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        let files: Vec<(String, String)> = (0..50)
            .map(|i| (format!("dir{}/file{}.txt", i % 5, i), format!("content {i}")))
            .collect();
        let file_refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        write_tree(left_dir.path(), &file_refs);
        write_tree(right_dir.path(), &file_refs[..40]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let serial = reconcile(
            &left,
            &right,
            &ReconcileOptions {
                jobs: 1,
                cancel: None,
            },
        );
        let parallel = reconcile(
            &left,
            &right,
            &ReconcileOptions {
                jobs: 8,
                cancel: None,
            },
        );

        assert_eq!(serial, parallel);
        assert_count_invariants(&parallel, &left, &right);
    }

    #[test]
    fn cancellation_reports_common_paths_as_indeterminate() {
        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("a", "1"), ("b", "2"), ("only", "3")]);
        write_tree(right_dir.path(), &[("a", "1"), ("b", "2")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let report = reconcile(
            &left,
            &right,
            &ReconcileOptions {
                jobs: 2,
                cancel: Some(cancel),
            },
        );

        // Nothing dropped: every common path surfaces as Error, every unique
        // path keeps its record.
        assert_eq!(report.errored_count(), 2);
        assert_eq!(report.matched_count(), 0);
        assert_eq!(report.unique_to(Side::Left).len(), 1);
        assert!(report.unique_to(Side::Left)[0].digest.is_none());
        assert_count_invariants(&report, &left, &right);
    }

    #[test]
    #[cfg(unix)]
    fn unreadable_common_file_is_error_with_side() {
        use std::os::unix::fs::PermissionsExt;

        let left_dir = TempDir::new().unwrap();
        let right_dir = TempDir::new().unwrap();
        write_tree(left_dir.path(), &[("f.txt", "content")]);
        write_tree(right_dir.path(), &[("f.txt", "content")]);

        let left = build_index(left_dir.path()).unwrap();
        let right = build_index(right_dir.path()).unwrap();

        let target = left_dir.path().join("f.txt");
        let mut perms = fs::metadata(&target).unwrap().permissions();
        perms.set_mode(0o000);
        fs::set_permissions(&target, perms).unwrap();

        let report = reconcile(&left, &right, &ReconcileOptions::default());

        let (_, outcome) = report.outcomes().next().unwrap();
        match outcome {
            CommonOutcome::Error { cause } => {
                assert!(cause.starts_with("left:"), "unexpected cause: {cause}");
                assert!(cause.contains("Permission denied"));
            }
            other => panic!("Expected error outcome, got {other:?}"),
        }
    }
}
