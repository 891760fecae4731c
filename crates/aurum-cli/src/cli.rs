//! CLI argument definitions for aurum.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Latest quotes for securities |
//! | `rate` | Latest exchange rates for currency pairs |
//! | `reserves` | Official gold holdings, refreshed when stale |
//! | `history` | Stored observations for one entity |
//! | `backfill` | Load history for one entity into the store |
//! | `watch` | Manage the registered entity list |
//! | `cache` | Manage the observation cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$AURUM_HOME/config.toml` | Configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--cache` | `use` | Cache mode for fetch commands |
//! | `--deadline-ms` | from config | Overall fetch budget |
//! | `--verbose` | `false` | Debug logging on stderr |
//!
//! # Examples
//!
//! ```bash
//! aurum quote SH600519 HK00700 AAPL --pretty
//! aurum rate USD/CNY EUR/USD --cache refresh
//! aurum reserves CHN USA
//! aurum history reserve:CHN --periods 24
//! ```

use std::path::PathBuf;

use aurum_core::CacheMode;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Aurum - quotes, exchange rates and gold reserves from public providers
#[derive(Debug, Parser)]
#[command(
    name = "aurum",
    author,
    version,
    about = "Quotes, exchange rates and gold reserves from public providers",
    long_about = "Aurum fetches financial observations from several public providers with \
ordered fallback, caches them with market-aware expiry and reconciles periodic series \
into a local DuckDB store.\n\
\n\
Use 'aurum <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Configuration file. Defaults to `$AURUM_HOME/config.toml` when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// How fetch commands use the cache.
    #[arg(long, global = true, value_enum, default_value_t = CacheArg::Use)]
    pub cache: CacheArg,

    /// Overall fetch budget in milliseconds. Overrides `fetch.deadline_ms`.
    #[arg(long, global = true)]
    pub deadline_ms: Option<u64>,

    /// Debug logging on stderr. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheArg {
    /// Serve unexpired entries, store fresh results.
    Use,
    /// Always fetch, store fresh results.
    Refresh,
    /// Always fetch, store nothing in the cache.
    Bypass,
}

impl From<CacheArg> for CacheMode {
    fn from(value: CacheArg) -> Self {
        match value {
            CacheArg::Use => Self::Use,
            CacheArg::Refresh => Self::Refresh,
            CacheArg::Bypass => Self::Bypass,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch latest quotes.
    Quote(QuoteArgs),
    /// Fetch latest exchange rates.
    Rate(RateArgs),
    /// Latest gold holdings with deltas, refetching stale series.
    Reserves(ReservesArgs),
    /// Stored observations for one entity, most recent first.
    History(HistoryArgs),
    /// Load provider history for one entity into the store.
    Backfill(BackfillArgs),
    /// Manage registered entities.
    Watch(WatchArgs),
    /// Manage the observation cache.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Security codes, e.g. SH600519, HK00700, AAPL.
    #[arg(required = true, num_args = 1..)]
    pub codes: Vec<String>,

    /// Listing market. Inferred from each code when omitted.
    #[arg(long)]
    pub market: Option<String>,
}

#[derive(Debug, Args)]
pub struct RateArgs {
    /// Currency pairs as BASE/QUOTE or BASEQUOTE, e.g. USD/CNY. A bare BASE
    /// such as USD asks for its rate against every common currency.
    #[arg(required = true, num_args = 1..)]
    pub pairs: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReservesArgs {
    /// ISO alpha-3 country codes. Defaults to the watchlist, then the store.
    pub countries: Vec<String>,

    /// Refetch every series regardless of staleness.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Entity id, e.g. `reserve:CHN` or `rate:USD/CNY`.
    pub entity: String,

    #[arg(long, default_value_t = 12)]
    pub periods: usize,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Entity id, e.g. `reserve:CHN`.
    pub entity: String,

    #[arg(long, default_value_t = 120)]
    pub periods: u32,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(subcommand)]
    pub command: WatchCommand,
}

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    /// Register entities.
    Add {
        #[arg(required = true, num_args = 1..)]
        entities: Vec<String>,
    },
    /// Unregister entities.
    Remove {
        #[arg(required = true, num_args = 1..)]
        entities: Vec<String>,
    },
    /// List registered entities.
    List {
        /// Restrict to one class: quote, rate or reserve.
        #[arg(long)]
        class: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Drop every cached observation.
    Clear,
}
