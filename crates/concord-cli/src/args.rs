use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "concord",
    version,
    about = "Resolve disagreement between scoring judges into versioned consensus results"
)]
pub struct Cli {
    /// Log at debug level (overrides CONCORD_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve a file of judge scores
    Resolve(ResolveArgs),
    /// Check a consensus configuration file
    Validate(ValidateArgs),
    /// Score the evidence quality of a rationale
    Assess(AssessArgs),
    /// Inspect or reset a saved reliability ledger
    #[command(subcommand)]
    Ledger(LedgerCommand),
    /// Print the configuration JSON Schema
    Schema,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Score file (JSON array or YAML list of judge scores)
    pub scores: PathBuf,

    /// Consensus configuration (YAML or JSON); built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Reviewer decisions to apply to escalated rounds
    #[arg(long)]
    pub decisions: Option<PathBuf>,

    /// Reliability ledger snapshot to start from
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Write the updated reliability ledger here
    #[arg(long)]
    pub save_ledger: Option<PathBuf>,

    /// Previously recorded decisions to replay
    #[arg(long)]
    pub overrides: Option<PathBuf>,

    /// Write all recorded decisions here
    #[arg(long)]
    pub save_overrides: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Configuration file to check
    pub config: PathBuf,
}

#[derive(Args)]
pub struct AssessArgs {
    /// Rationale text; read from --file when omitted
    pub text: Option<String>,

    /// Read the rationale from a file
    #[arg(long, conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Configuration providing the evidence vocabulary and coefficients
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

#[derive(Subcommand)]
pub enum LedgerCommand {
    /// Print every judge profile in a ledger snapshot
    Show {
        ledger: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Reset one judge's history
    Reset {
        ledger: PathBuf,

        #[arg(long)]
        judge: String,

        /// Where to write the result; the input file when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration whose reliability settings the ledger was built with
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
