use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    discover::DiscoverArgs, extract::ExtractArgs, ingest::IngestArgs, validate::ValidateArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "convtree",
    version,
    about = "Recover ChatGPT iOS conversations from device backups"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Raise log verbosity to debug; `RUST_LOG` takes precedence when set.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Locate conversation folders and documents under a backup root.
    Discover(DiscoverArgs),
    /// Reconstruct transcripts from every conversation document.
    Extract(ExtractArgs),
    /// Check a transcripts file against the schema and record invariants.
    Validate(ValidateArgs),
    /// Load a transcripts file into SQLite.
    Ingest(IngestArgs),
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Discover(_) => "discover",
            Self::Extract(_) => "extract",
            Self::Validate(_) => "validate",
            Self::Ingest(_) => "ingest",
        }
    }
}
