use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "smrlog",
    about = "Replicated objects over a shared log",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Object configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Hammer one counter with concurrent increments and reads
    Counter(CounterArgs),
    /// Run random transactional transfers between accounts
    Transfer(TransferArgs),
    /// Write a few updates and print the resulting log
    Trace(TraceArgs),
    /// Print the effective object configuration
    Config,
}

#[derive(Args)]
pub struct CounterArgs {
    /// Writer threads, each with its own replica
    #[arg(long, default_value_t = 4)]
    pub writers: usize,
    /// Increments per writer
    #[arg(long, default_value_t = 100)]
    pub increments: usize,
    /// Reader threads
    #[arg(long, default_value_t = 2)]
    pub readers: usize,
}

#[derive(Args)]
pub struct TransferArgs {
    #[arg(long, default_value_t = 5)]
    pub accounts: usize,
    /// Starting balance of each account
    #[arg(long, default_value_t = 100)]
    pub balance: i64,
    #[arg(long, default_value_t = 4)]
    pub threads: usize,
    /// Committed transfers per thread
    #[arg(long, default_value_t = 25)]
    pub transfers: usize,
}

#[derive(Args)]
pub struct TraceArgs {
    /// Key/value pairs to put, as key=value
    #[arg(default_values_t = ["a=1".to_string(), "b=2".to_string(), "a=3".to_string()])]
    pub puts: Vec<String>,
}
