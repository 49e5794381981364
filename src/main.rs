mod cli;
mod digest;
mod output;
mod reconcile;
mod report;
mod tree_index;
mod util;

use anyhow::Context;
use cli::Cli;
use reconcile::{ReconcileOptions, default_jobs, reconcile};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::Path;
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tree_index::{TreeIndex, build_index};

struct CompareExitCode;

impl CompareExitCode {
    /// Exit code used when the trees differ or files could not be verified.
    fn differences_found() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match run(cli) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            CompareExitCode::any_error()
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (left, right) = build_indexes(&cli.left, &cli.right)?;

    info!(
        "Indexed {} files under {}",
        left.len(),
        left.root().display()
    );
    info!(
        "Indexed {} files under {}",
        right.len(),
        right.root().display()
    );
    report_scan_warnings(&left);
    report_scan_warnings(&right);

    let options = ReconcileOptions {
        jobs: cli.jobs.unwrap_or_else(default_jobs),
        cancel: None,
    };
    let report = reconcile(&left, &right, &options);

    if cli.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{rendered}");
    } else {
        output::print_report(&report, &left, &right, cli.all, cli.long);
    }

    if report.is_identical() {
        info!(
            "Trees are identical: {} files matched",
            report.matched_count()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(CompareExitCode::differences_found())
    }
}

fn build_indexes(left: &Path, right: &Path) -> anyhow::Result<(TreeIndex, TreeIndex)> {
    // The two scans are independent with no shared mutable state; run the
    // left one on its own thread while this thread scans the right.
    std::thread::scope(|scope| {
        let left_handle = scope.spawn(|| build_index(left));
        let right_index = build_index(right);
        let left_index = left_handle
            .join()
            .map_err(|_| anyhow::anyhow!("index worker panicked"))?;

        Ok((
            left_index.with_context(|| format!("failed to index {}", left.display()))?,
            right_index.with_context(|| format!("failed to index {}", right.display()))?,
        ))
    })
}

fn report_scan_warnings(index: &TreeIndex) {
    if index.skipped_dirs() > 0 {
        warn!(
            "{}: skipped {} unreadable director{}",
            index.root().display(),
            index.skipped_dirs(),
            if index.skipped_dirs() == 1 { "y" } else { "ies" }
        );
    }
    if index.skipped_special() > 0 {
        debug!(
            "{}: skipped {} non-regular entries",
            index.root().display(),
            index.skipped_special()
        );
    }
}

fn init_tracing(verbose: u8) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
