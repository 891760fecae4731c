//! Application configuration.
//!
//! Loaded from TOML. Resolution order: an explicit path, then
//! `$AURUM_HOME/config.toml`, then built-in defaults. `AURUM_HOME` defaults to
//! `~/.aurum`. Every section is optional.
//!
//! ```toml
//! [sources]
//! rate = ["exchange_rate_api", "frankfurter"]
//! fallback_enabled = true
//!
//! [cache]
//! backend = "file"
//!
//! [cache.ttl.quote]
//! open = 120
//! closed = 3600
//!
//! [calendar.markets.US]
//! utc_offset_minutes = -240
//! sessions = ["09:30-16:00"]
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::TtlPolicy;
use crate::calendar::{MarketSchedule, TradingCalendar};
use crate::reconcile::DeltaHorizon;
use crate::registry::SourceRegistry;
use crate::{EntityClass, Market, ProviderId, ValidationError};

const CONFIG_FILE: &str = "config.toml";
const IMF_API_KEY_ENV: &str = "AURUM_IMF_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ValidationError> for ConfigError {
    fn from(error: ValidationError) -> Self {
        Self::Invalid(error.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub deltas: DeltasConfig,
    pub store: StoreConfig,
    pub calendar: CalendarConfig,
    #[serde(skip)]
    home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub quote: Vec<ProviderId>,
    pub rate: Vec<ProviderId>,
    pub reserve: Vec<ProviderId>,
    pub fallback_enabled: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let registry = SourceRegistry::default();
        Self {
            quote: registry.providers_for(EntityClass::Quote).to_vec(),
            rate: registry.providers_for(EntityClass::Rate).to_vec(),
            reserve: registry.providers_for(EntityClass::Reserve).to_vec(),
            fallback_enabled: registry.fallback_enabled(),
        }
    }
}

impl SourcesConfig {
    pub fn registry(&self) -> SourceRegistry {
        SourceRegistry::builder()
            .chain(EntityClass::Quote, self.quote.iter().copied())
            .chain(EntityClass::Rate, self.rate.iter().copied())
            .chain(EntityClass::Reserve, self.reserve.iter().copied())
            .fallback(self.fallback_enabled)
            .build()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    File,
    Layered,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Cache file for the file and layered backends.
    pub path: Option<PathBuf>,
    /// `redis://` URL of the shared layer used by the layered backend.
    pub remote_url: Option<String>,
    /// Namespace for keys in the shared layer; defaults to `aurum:`.
    pub remote_prefix: Option<String>,
    pub ttl: TtlPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_concurrency: usize,
    pub deadline_ms: Option<u64>,
    pub request_timeout_ms: u64,
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            deadline_ms: None,
            request_timeout_ms: 10_000,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltasConfig {
    pub horizons: Vec<DeltaHorizon>,
}

impl Default for DeltasConfig {
    fn default() -> Self {
        Self {
            horizons: DeltaHorizon::defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub max_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Per-market overrides keyed by market code (`CN`, `US`, ...).
    pub markets: BTreeMap<String, MarketScheduleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketScheduleConfig {
    pub utc_offset_minutes: i32,
    pub sessions: Vec<String>,
    #[serde(default = "default_closed_weekdays")]
    pub closed_weekdays: Vec<String>,
}

fn default_closed_weekdays() -> Vec<String> {
    vec![String::from("saturday"), String::from("sunday")]
}

impl CalendarConfig {
    /// Default calendar with configured overrides applied.
    pub fn calendar(&self) -> Result<TradingCalendar, ConfigError> {
        let mut calendar = TradingCalendar::default();
        for (code, schedule) in &self.markets {
            let market = Market::from_str(code)?;
            let schedule = MarketSchedule::from_parts(
                schedule.utc_offset_minutes,
                &schedule.sessions,
                &schedule.closed_weekdays,
            )?;
            calendar = calendar.with_schedule(market, schedule);
        }
        Ok(calendar)
    }
}

impl AppConfig {
    /// Load configuration. An explicit path must exist; the default location may not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let home = resolve_aurum_home();
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (home.join(CONFIG_FILE), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|source| match source {
                ConfigError::Parse { source, .. } => ConfigError::Parse {
                    path: path.clone(),
                    source,
                },
                other => other,
            })?,
            Err(error) if !required && error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        config.home = home;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `home`, for tests and embedding.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::Invalid(String::from(
                "fetch.max_concurrency must be at least 1",
            )));
        }
        if self.store.max_pool_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "store.max_pool_size must be at least 1",
            )));
        }
        for horizon in &self.deltas.horizons {
            if horizon.periods == 0 {
                return Err(ConfigError::Invalid(format!(
                    "delta horizon '{}' must span at least one period",
                    horizon.label
                )));
            }
        }
        if self.cache.backend == CacheBackendKind::Layered && self.cache.remote_url.is_none() {
            tracing::warn!("layered cache configured without remote_url; only the local layer is used");
        }
        self.calendar.calendar().map(|_| ())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.home.join("aurum.duckdb"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| self.home.join("cache.json"))
    }

    pub fn imf_api_key(&self) -> Option<String> {
        env::var(IMF_API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// Resolve the aurum home directory from environment or default.
pub fn resolve_aurum_home() -> PathBuf {
    if let Some(path) = env::var_os("AURUM_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".aurum");
    }

    PathBuf::from(".aurum")
}
