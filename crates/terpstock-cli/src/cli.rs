//! CLI argument definitions for terpstock.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve` | HTTP server plus scheduled runs |
//! | `run` | One on-demand ingestion run |
//! | `search` | Strain search over the latest snapshot |
//! | `check-batch` | Batch presence for one dispensary |
//! | `genetics` | Lineage lookup |
//! | `sources` | Configured sources and their policies |
//!
//! # Examples
//!
//! ```bash
//! terpstock run --source muv --source trulieve --pretty
//! terpstock search "blue dream" --dispensary cookies
//! terpstock check-batch trulieve TRU-100_B1
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use terpstock_core::DispensaryId;

#[derive(Debug, Parser)]
#[command(
    name = "terpstock",
    author,
    version,
    about = "Dispensary batch and strain stock tracker"
)]
pub struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server and the run scheduler.
    Serve(ServeArgs),

    /// Execute one on-demand run and print its summary.
    ///
    /// Exits with code 3 when no source produced data.
    Run(RunArgs),

    /// Search strains in the latest snapshot.
    ///
    ///   terpstock search gelato --limit 10
    Search(SearchArgs),

    /// Check whether batch ids are in current inventory.
    CheckBatch(CheckBatchArgs),

    /// Look up recorded lineage for a strain.
    Genetics(GeneticsArgs),

    /// List sources with store enumeration, categories and policy.
    Sources,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Overrides `server.bind`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Serve queries only; no scheduled runs.
    #[arg(long, default_value_t = false)]
    pub no_schedule: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Restrict the run to these sources. Repeatable.
    #[arg(long = "source", value_parser = parse_dispensary)]
    pub sources: Vec<DispensaryId>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub fragment: String,

    #[arg(long, value_parser = parse_dispensary)]
    pub dispensary: Option<DispensaryId>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CheckBatchArgs {
    pub dispensary: String,

    #[arg(required = true, num_args = 1..)]
    pub batch_ids: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GeneticsArgs {
    pub strain: String,
}

fn parse_dispensary(value: &str) -> Result<DispensaryId, String> {
    value.parse().map_err(|error: terpstock_core::ValidationError| error.to_string())
}
