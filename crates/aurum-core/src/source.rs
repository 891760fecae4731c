use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in registry chains and observation tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Eastmoney,
    Sina,
    Frankfurter,
    #[serde(alias = "exchangerate")]
    ExchangeRateApi,
    Imf,
}

impl ProviderId {
    pub const ALL: [Self; 5] = [
        Self::Eastmoney,
        Self::Sina,
        Self::Frankfurter,
        Self::ExchangeRateApi,
        Self::Imf,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eastmoney => "eastmoney",
            Self::Sina => "sina",
            Self::Frankfurter => "frankfurter",
            Self::ExchangeRateApi => "exchange_rate_api",
            Self::Imf => "imf",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "eastmoney" => Ok(Self::Eastmoney),
            "sina" => Ok(Self::Sina),
            "frankfurter" => Ok(Self::Frankfurter),
            "exchange_rate_api" | "exchangerate" | "exchangerate_api" => Ok(Self::ExchangeRateApi),
            "imf" => Ok(Self::Imf),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
