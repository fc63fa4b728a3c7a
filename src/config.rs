//! Command-line and environment configuration for the dupcheck binary.
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over built-in defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;
use crate::storage::{db_path, resolve_data_dir, StoreConfig};
use crate::table::{ExportFormat, PhoneCell};

/// Check phone-number sheets against a persistent store of numbers already
/// seen, and keep only the new ones.
#[derive(Parser, Debug)]
#[command(name = "dupcheck", version, about)]
pub struct Cli {
    /// Store file [env: DUPCHECK_DB] [default: $DUPCHECK_HOME/phones.db]
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Show debug output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Only show errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable coloured log output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Filter a sheet down to numbers not yet in the store
    Check {
        /// CSV or one-number-per-line input file
        input: PathBuf,

        /// Where to write the unique rows [default: <input>_unique.csv]
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Provenance label stored with recorded numbers [default: input file name]
        #[arg(long, short = 'l')]
        label: Option<String>,

        /// Record the batch in the store after filtering
        #[arg(long)]
        record: bool,

        /// How to write the phone column; `text` wraps it as ="..." so
        /// spreadsheets keep leading zeros
        #[arg(long, value_enum, default_value = "text")]
        phone_cell: PhoneCell,
    },

    /// Show store counters
    Stats,

    /// Export every stored record
    Export {
        /// Output file [default: stdout]
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
    },

    /// Delete every stored record (asks for a confirmation token)
    Clear,
}

pub struct Config {
    pub store: StoreConfig,
    pub verbosity: Verbosity,
    pub no_color: bool,
}

impl Config {
    pub fn from_cli_and_env(cli: &Cli) -> Self {
        let db = cli
            .db
            .clone()
            .or_else(|| std::env::var("DUPCHECK_DB").ok().map(PathBuf::from))
            .unwrap_or_else(|| db_path(&resolve_data_dir()));

        let defaults = StoreConfig::default();
        let store = StoreConfig {
            page_size: env_usize("DUPCHECK_PAGE_SIZE", defaults.page_size),
            insert_batch_size: env_usize("DUPCHECK_BATCH_SIZE", defaults.insert_batch_size),
            ..StoreConfig::at(db)
        };

        Self {
            store,
            verbosity: Verbosity::from_flags(cli.verbose, cli.quiet),
            no_color: cli.no_color,
        }
    }
}

fn env_usize(key: &str, default_value: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}
