use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_CODE_LEN: usize = 16;

/// Kind of trackable entity. Drives provider chains, cache TTLs and period
/// granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Quote,
    Rate,
    Reserve,
}

/// Width of the period bucket observations of a class fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Month,
}

impl EntityClass {
    pub const ALL: [Self; 3] = [Self::Quote, Self::Rate, Self::Reserve];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Rate => "rate",
            Self::Reserve => "reserve",
        }
    }

    /// Periodic classes are reconciled into the durable store.
    pub const fn is_periodic(self) -> bool {
        matches!(self, Self::Rate | Self::Reserve)
    }

    pub const fn granularity(self) -> Granularity {
        match self {
            Self::Quote => Granularity::Day,
            Self::Rate | Self::Reserve => Granularity::Month,
        }
    }
}

impl Display for EntityClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quote" | "quotes" => Ok(Self::Quote),
            "rate" | "rates" | "forex" => Ok(Self::Rate),
            "reserve" | "reserves" | "gold" => Ok(Self::Reserve),
            other => Err(ValidationError::InvalidEntityClass {
                value: other.to_owned(),
            }),
        }
    }
}

/// Market an entity trades on; selects the trading calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Cn,
    Hk,
    Us,
    Fund,
    Bond,
    Global,
    Forex,
}

impl Market {
    pub const ALL: [Self; 7] = [
        Self::Cn,
        Self::Hk,
        Self::Us,
        Self::Fund,
        Self::Bond,
        Self::Global,
        Self::Forex,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cn => "CN",
            Self::Hk => "HK",
            Self::Us => "US",
            Self::Fund => "FUND",
            Self::Bond => "BOND",
            Self::Global => "GLOBAL",
            Self::Forex => "FOREX",
        }
    }

    /// Guess the listing market from a quote code: `SH600519`/`SZ000001` are
    /// mainland listings, `HK00700` Hong Kong, six bare digits a mutual fund,
    /// anything else a US ticker.
    pub fn infer_for_quote(code: &str) -> Self {
        let upper = code.trim().to_ascii_uppercase();
        let digits_after = |prefix: &str| {
            upper
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
        };

        if digits_after("SH") || digits_after("SZ") || digits_after("BJ") {
            Self::Cn
        } else if digits_after("HK") {
            Self::Hk
        } else if upper.len() == 6 && upper.chars().all(|ch| ch.is_ascii_digit()) {
            Self::Fund
        } else {
            Self::Us
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|market| market.as_str() == normalized)
            .ok_or(ValidationError::InvalidMarket { value: normalized })
    }
}

/// A trackable financial object.
///
/// Identity is `(class, code)`; market and display name are attributes and do
/// not participate in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    class: EntityClass,
    code: String,
    market: Market,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Entity {
    /// A listed security. The market is inferred from the code when absent.
    pub fn quote(code: &str, market: Option<Market>) -> Result<Self, ValidationError> {
        let code = normalize_code(code)?;
        let market = market.unwrap_or_else(|| Market::infer_for_quote(&code));
        Ok(Self {
            class: EntityClass::Quote,
            code,
            market,
            name: None,
        })
    }

    /// A currency pair quoted as units of `quote` per one `base`.
    pub fn rate(base: &str, quote: &str) -> Result<Self, ValidationError> {
        let base = normalize_currency(base)?;
        let quote = normalize_currency(quote)?;
        Ok(Self {
            class: EntityClass::Rate,
            code: format!("{base}/{quote}"),
            market: Market::Forex,
            name: None,
        })
    }

    /// A country's official gold reserve series, keyed by ISO alpha-3 code.
    pub fn reserve(country: &str) -> Result<Self, ValidationError> {
        let country = country.trim().to_ascii_uppercase();
        if country.len() != 3 || !country.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCountry { value: country });
        }
        Ok(Self {
            class: EntityClass::Reserve,
            code: country,
            market: Market::Global,
            name: None,
        })
    }

    /// Build an entity of any class from its code, e.g. `USD/CNY` for a rate.
    pub fn from_code(
        class: EntityClass,
        code: &str,
        market: Option<Market>,
    ) -> Result<Self, ValidationError> {
        match class {
            EntityClass::Quote => Self::quote(code, market),
            EntityClass::Rate => {
                let (base, quote) = code
                    .split_once('/')
                    .ok_or_else(|| ValidationError::InvalidCurrency {
                        value: code.to_owned(),
                    })?;
                Self::rate(base, quote)
            }
            EntityClass::Reserve => Self::reserve(code),
        }
    }

    /// Parse a stable identifier such as `rate:USD/CNY`.
    pub fn parse_id(id: &str) -> Result<Self, ValidationError> {
        let (class, code) = id
            .split_once(':')
            .ok_or_else(|| ValidationError::InvalidEntityId { value: id.to_owned() })?;
        Self::from_code(class.parse()?, code, None)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.name = (!trimmed.is_empty()).then(|| trimmed.to_owned());
        self
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = market;
        self
    }

    /// Stable identifier used as cache key and store key.
    pub fn id(&self) -> String {
        format!("{}:{}", self.class, self.code)
    }

    pub const fn class(&self) -> EntityClass {
        self.class
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub const fn market(&self) -> Market {
        self.market
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Base and quote currency of a rate entity.
    pub fn currency_pair(&self) -> Option<(&str, &str)> {
        match self.class {
            EntityClass::Rate => self.code.split_once('/'),
            _ => None,
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.code == other.code
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        self.code.hash(state);
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.code)
    }
}

fn normalize_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(ValidationError::EmptyCode);
    }

    let len = normalized.chars().count();
    if len > MAX_CODE_LEN {
        return Err(ValidationError::CodeTooLong {
            len,
            max: MAX_CODE_LEN,
        });
    }

    for (index, ch) in normalized.chars().enumerate() {
        if !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '-') {
            return Err(ValidationError::CodeInvalidChar { ch, index });
        }
    }

    Ok(normalized)
}

fn normalize_currency(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    if normalized.len() != 3 || !normalized.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidCurrency { value: normalized });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identity_ignores_market_and_name() {
        let plain = Entity::quote("sh600519", None).expect("valid quote");
        let named = Entity::quote("SH600519", Some(Market::Us))
            .expect("valid quote")
            .with_name("Kweichow Moutai");

        assert_eq!(plain, named);
        let set: HashSet<_> = [plain, named].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn ids_are_stable_and_parse_back() {
        let rate = Entity::rate("usd", "cny").expect("valid rate");
        assert_eq!(rate.id(), "rate:USD/CNY");
        assert_eq!(rate.market(), Market::Forex);
        assert_eq!(rate.currency_pair(), Some(("USD", "CNY")));

        let parsed = Entity::parse_id("reserve:chn").expect("valid id");
        assert_eq!(parsed, Entity::reserve("CHN").expect("valid reserve"));
        assert_eq!(parsed.market(), Market::Global);
    }

    #[test]
    fn infers_quote_markets_from_code_shape() {
        assert_eq!(Market::infer_for_quote("SZ000001"), Market::Cn);
        assert_eq!(Market::infer_for_quote("hk00700"), Market::Hk);
        assert_eq!(Market::infer_for_quote("161725"), Market::Fund);
        assert_eq!(Market::infer_for_quote("AAPL"), Market::Us);
        assert_eq!(Market::infer_for_quote("SHOP"), Market::Us);
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(matches!(
            Entity::quote("  ", None),
            Err(ValidationError::EmptyCode)
        ));
        assert!(matches!(
            Entity::quote("AAPL$", None),
            Err(ValidationError::CodeInvalidChar { ch: '$', .. })
        ));
        assert!(Entity::rate("US", "CNY").is_err());
        assert!(Entity::reserve("CN1").is_err());
        assert!(Entity::parse_id("USD/CNY").is_err());
    }
}
