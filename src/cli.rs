use clap::Parser;
use std::path::PathBuf;

/// Compare two trees of files by checksum
#[derive(Parser, Debug)]
#[command(name = "treesame", version, about, long_about = None)]
pub struct Cli {
    /// First tree to compare ("left")
    #[arg(value_name = "LEFT")]
    pub left: PathBuf,

    /// Second tree to compare ("right")
    #[arg(value_name = "RIGHT")]
    pub right: PathBuf,

    /// Number of digest worker threads (default: available cores, capped at 8)
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// List matched files too, not only differences
    #[arg(long)]
    pub all: bool,

    /// Show per-file detail (size, mtime, digest) under each listed path
    #[arg(long)]
    pub long: bool,

    /// Emit the full report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
