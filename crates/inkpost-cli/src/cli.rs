use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use inkpost_types::{AccountId, Correlation};

#[derive(Parser)]
#[command(
    name = "inkpost",
    about = "Inkpost credit ledger: offline journal verification and audit",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check hash chains, sequences, and balance arithmetic
    Verify(VerifyArgs),
    /// Recompute balances from the journal alone
    Replay(ReplayArgs),
    /// Pair generation debits with deliveries and refunds
    Reconcile(ReconcileArgs),
    /// List journal entries
    Audit(AuditArgs),
    /// Show the effective billing configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Exported journal snapshot (JSON)
    pub journal: PathBuf,
}

#[derive(Args)]
pub struct ReplayArgs {
    pub journal: PathBuf,
    #[arg(long)]
    pub account: Option<AccountId>,
    /// Stop after this entry sequence number
    #[arg(long, requires = "account")]
    pub until_seq: Option<u64>,
}

#[derive(Args)]
pub struct ReconcileArgs {
    pub journal: PathBuf,
    /// Debits younger than this (relative to the export time) are in flight
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(i64).range(0..))]
    pub grace_minutes: i64,
}

#[derive(Args)]
pub struct AuditArgs {
    pub journal: PathBuf,
    #[arg(long)]
    pub account: Option<AccountId>,
    /// e.g. `generation:<uuid>` or `adjustment:TICKET-7`
    #[arg(long)]
    pub correlation: Option<Correlation>,
    /// RFC 3339 timestamp, inclusive
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// RFC 3339 timestamp, exclusive
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML file to load; defaults apply when omitted
    pub path: Option<PathBuf>,
}
