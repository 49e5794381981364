use crate::report::{CommonOutcome, Report, Side};
use crate::tree_index::TreeIndex;
use std::path::Path;

/// Renders a finished report to stdout, one coded line per path:
/// `M` mismatch, `E` could-not-verify, `<`/`>` unique to left/right,
/// `=` match (only with `all`). Mismatch and Error are deliberately
/// distinct codes; conflating them would hide which files need manual
/// attention.
pub fn print_report(report: &Report, left: &TreeIndex, right: &TreeIndex, all: bool, long: bool) {
    for line in listing_lines(report, left, right, all, long) {
        println!("{line}");
    }

    if !report.is_identical() {
        println!();
        println!(
            "{} matched, {} mismatched, {} errored, {} only in left, {} only in right",
            report.matched_count(),
            report.mismatched_count(),
            report.errored_count(),
            report.unique_to(Side::Left).len(),
            report.unique_to(Side::Right).len()
        );
        println!("Fingerprint: {}", report.fingerprint());
    }
}

struct Line<'a> {
    path: &'a str,
    code: &'static str,
    detail: Vec<String>,
}

fn listing_lines(
    report: &Report,
    left: &TreeIndex,
    right: &TreeIndex,
    all: bool,
    long: bool,
) -> Vec<String> {
    let mut entries: Vec<Line> = Vec::new();

    for (path, outcome) in report.outcomes() {
        match outcome {
            CommonOutcome::Match => {
                if all {
                    entries.push(Line {
                        path,
                        code: "=",
                        detail: Vec::new(),
                    });
                }
            }
            CommonOutcome::Mismatch => {
                let detail = if long {
                    vec![
                        format!("   left:  {}", describe_file(left.get(path))),
                        format!("   right: {}", describe_file(right.get(path))),
                    ]
                } else {
                    Vec::new()
                };
                entries.push(Line {
                    path,
                    code: "M",
                    detail,
                });
            }
            CommonOutcome::Error { cause } => {
                let detail = if long {
                    vec![format!("   cause: {cause}")]
                } else {
                    Vec::new()
                };
                entries.push(Line {
                    path,
                    code: "E",
                    detail,
                });
            }
        }
    }

    for unique in report.unique_to(Side::Left) {
        entries.push(Line {
            path: &unique.path,
            code: "<",
            detail: unique_detail(left.get(&unique.path), unique.digest.as_deref(), long),
        });
    }
    for unique in report.unique_to(Side::Right) {
        entries.push(Line {
            path: &unique.path,
            code: ">",
            detail: unique_detail(right.get(&unique.path), unique.digest.as_deref(), long),
        });
    }

    entries.sort_by(|a, b| a.path.cmp(b.path));

    let mut lines = Vec::new();
    for entry in entries {
        lines.push(format!("{:<2} {}", entry.code, entry.path));
        lines.extend(entry.detail);
    }
    lines
}

fn unique_detail(absolute: Option<&Path>, digest: Option<&str>, long: bool) -> Vec<String> {
    if !long {
        return Vec::new();
    }
    let digest_text = match digest {
        Some(digest) => truncate_digest(digest),
        None => "unavailable".to_string(),
    };
    vec![format!(
        "   {}, sha256: {}",
        describe_file(absolute),
        digest_text
    )]
}

fn describe_file(absolute: Option<&Path>) -> String {
    let Some(absolute) = absolute else {
        return "unavailable".to_string();
    };

    let metadata = match std::fs::metadata(absolute) {
        Ok(metadata) => metadata,
        Err(e) => return format!("unavailable: {e}"),
    };

    match metadata.modified() {
        Ok(mtime) => format!(
            "file ({}, mtime: {})",
            format_size(metadata.len()),
            format_mtime(mtime)
        ),
        Err(_) => format!("file ({})", format_size(metadata.len())),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_mtime(mtime: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Local> = mtime.into();
    datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn truncate_digest(digest: &str) -> String {
    if digest.len() > 12 {
        format!("{}...", &digest[..12])
    } else {
        digest.to_string()
    }
}
