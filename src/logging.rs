//! Log setup and log-safe formatting helpers.
//!
//! [`init`] installs a `tracing-subscriber` fmt layer writing to stderr.
//! The filter comes from `DUPCHECK_LOG`, then `RUST_LOG`, then the CLI
//! verbosity. ANSI colour is only used when stderr is a terminal.
//!
//! Phone numbers are personal data: anything that logs a key should go
//! through [`masked_key`], which keeps only the last four digits.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Initialize the global subscriber. Call once at startup before any logging.
///
/// Returns quietly if a subscriber is already installed.
pub fn init(verbosity: Verbosity, no_color: bool) {
    let use_ansi = !no_color && std::io::stderr().is_terminal();
    COLOUR_ENABLED.store(use_ansi, Ordering::Relaxed);

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    let _ = tracing_subscriber::registry()
        .with(build_filter(verbosity))
        .with(layer.compact())
        .try_init();
}

fn build_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var("DUPCHECK_LOG") {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(verbosity.default_level().as_str().to_ascii_lowercase())
}

/// Returns whether ANSI colour output is enabled.
pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const VISIBLE_DIGITS: usize = 4;

/// Render a key with all but its last four characters masked.
///
/// `812345678` becomes `*****5678`; keys of four characters or fewer are
/// masked entirely.
pub fn masked_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= VISIBLE_DIGITS {
        return "*".repeat(len);
    }
    let hidden = len - VISIBLE_DIGITS;
    let tail: String = key.chars().skip(hidden).collect();
    format!("{}{tail}", "*".repeat(hidden))
}

const RESET: &str = "\x1b[0m";

const LABEL_COLOURS: &[&str] = &[
    "\x1b[92m", // bright green
    "\x1b[93m", // bright yellow
    "\x1b[94m", // bright blue
    "\x1b[95m", // bright magenta
    "\x1b[96m", // bright cyan
    "\x1b[36m", // cyan
];

fn hash_colour(s: &str) -> &'static str {
    let hash: u32 = s
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    LABEL_COLOURS[(hash as usize) % LABEL_COLOURS.len()]
}

/// Format a source label for terminal output, with a stable colour per
/// label when colour is enabled.
pub fn source_label(label: &str) -> String {
    let shown = if label.is_empty() { "(unlabelled)" } else { label };
    if colour_enabled() {
        format!("{}{shown}{RESET}", hash_colour(label))
    } else {
        shown.to_string()
    }
}
