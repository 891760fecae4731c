use thiserror::Error;

/// Validation and contract errors exposed by `aurum-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity code cannot be empty")]
    EmptyCode,
    #[error("entity code length {len} exceeds max {max}")]
    CodeTooLong { len: usize, max: usize },
    #[error("entity code contains invalid character '{ch}' at index {index}")]
    CodeInvalidChar { ch: char, index: usize },
    #[error("invalid entity id '{value}', expected '<class>:<CODE>'")]
    InvalidEntityId { value: String },
    #[error("invalid entity class '{value}', expected one of quote, rate, reserve")]
    InvalidEntityClass { value: String },
    #[error("entity '{value}' is not a {expected}")]
    UnexpectedClass { expected: &'static str, value: String },
    #[error("invalid market '{value}', expected one of CN, HK, US, FUND, BOND, GLOBAL, FOREX")]
    InvalidMarket { value: String },

    #[error("currency must be a 3-letter ISO code: '{value}'")]
    InvalidCurrency { value: String },
    #[error("country code must be 3 ASCII letters: '{value}'")]
    InvalidCountry { value: String },

    #[error("invalid period '{value}', expected YYYY-MM or YYYY-MM-DD")]
    InvalidPeriod { value: String },
    #[error("period granularity does not match entity class '{class}'")]
    PeriodMismatch { class: &'static str },

    #[error("invalid source '{value}'")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("value kind does not match entity class '{class}'")]
    ValueMismatch { class: &'static str },

    #[error("invalid trading session '{value}', expected HH:MM-HH:MM")]
    InvalidSession { value: String },
    #[error("invalid weekday '{value}'")]
    InvalidWeekday { value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] aurum_warehouse::WarehouseError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no provider could serve '{entity}': {detail}")]
    Unavailable { entity: String, detail: String },
}
