//! Official gold holdings from the IMF International Liquidity dataset.
//!
//! The SDMX 3.0 JSON response carries observation values as positional
//! arrays keyed by an index into the `TIME_PERIOD` dimension. Values are in
//! fine troy ounces (thousands) and are converted to metric tonnes.

use std::sync::Arc;

use serde_json::Value;

use super::transport::{AdapterTransport, TransportSettings};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider::{HistoryProvider, Provider, ProviderFuture, RequestContext, SourceError};
use crate::{Entity, EntityClass, Observation, ObservationValue, Period, ProviderId};

const BASE_URL: &str = "https://api.imf.org/external/sdmx/3.0";
const DATAFLOW: &str = "IMF.STA/IL";
const SERIES_SUFFIX: &str = "RGV_REVS.FTO.M";
const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const KG_PER_TROY_OUNCE: f64 = 0.031_103_476_8;
/// Months requested when only the latest value is wanted.
const LATEST_WINDOW: u32 = 12;

#[derive(Clone)]
pub struct ImfAdapter {
    transport: AdapterTransport,
    base_url: String,
    auth: HttpAuth,
}

impl ImfAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_settings(http_client, TransportSettings::default())
    }

    pub fn with_settings(http_client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        Self {
            transport: AdapterTransport::new(ProviderId::Imf, http_client, settings),
            base_url: String::from(BASE_URL),
            auth: HttpAuth::None,
        }
    }

    /// Send the subscription key with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.auth = HttpAuth::Header {
            name: String::from(API_KEY_HEADER),
            value: api_key.into(),
        };
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Observations for the last `periods` months, most recent first.
    async fn fetch_series(
        &self,
        entity: &Entity,
        periods: u32,
        ctx: &RequestContext,
    ) -> Result<Vec<Observation>, SourceError> {
        if entity.class() != EntityClass::Reserve {
            return Err(SourceError::unsupported_class(ProviderId::Imf, entity));
        }
        let start = ctx.current_period(entity).back(periods)?;
        let url = format!(
            "{}/data/dataflow/{DATAFLOW}/+/{}.{SERIES_SUFFIX}?{}=ge:{}",
            self.base_url,
            urlencoding::encode(entity.code()),
            urlencoding::encode("c[TIME_PERIOD]"),
            start.key()
        );
        let request = HttpRequest::get(url).with_auth(&self.auth);
        let payload: Value = self.transport.get_json(request, ctx).await?;

        let mut observations = parse_series(&payload)?
            .into_iter()
            .map(|(period, tonnes)| {
                Observation::new(
                    entity.clone(),
                    period,
                    ObservationValue::reserve(tonnes),
                    ProviderId::Imf,
                    ctx.as_of(),
                )
                .map_err(SourceError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        observations.sort_by(|left, right| right.period.cmp(&left.period));
        observations.truncate(usize::try_from(periods).unwrap_or(usize::MAX));
        Ok(observations)
    }
}

impl Provider for ImfAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Imf
    }

    fn supported_class(&self) -> EntityClass {
        EntityClass::Reserve
    }

    fn is_available(&self) -> bool {
        self.transport.is_available()
    }

    fn fetch_one<'a>(
        &'a self,
        entity: &'a Entity,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Observation, SourceError>> {
        Box::pin(async move {
            self.fetch_series(entity, LATEST_WINDOW, ctx)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    SourceError::not_found(format!(
                        "imf reported no gold holdings for '{entity}' in the last {LATEST_WINDOW} months"
                    ))
                })
        })
    }

    fn history(&self) -> Option<&dyn HistoryProvider> {
        Some(self)
    }
}

impl HistoryProvider for ImfAdapter {
    fn fetch_history<'a>(
        &'a self,
        entity: &'a Entity,
        periods: u32,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Vec<Observation>, SourceError>> {
        Box::pin(self.fetch_series(entity, periods, ctx))
    }
}

/// `(period, tonnes)` pairs with a positive holding.
fn parse_series(payload: &Value) -> Result<Vec<(Period, f64)>, SourceError> {
    let data = payload
        .get("data")
        .ok_or_else(|| SourceError::invalid_response("imf response has no data object"))?;
    let data_sets = data
        .get("dataSets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if data_sets.is_empty() {
        return Ok(Vec::new());
    }

    let time_periods = time_periods(data);
    let mut series = Vec::new();
    for data_set in data_sets {
        let Some(all_series) = data_set.get("series").and_then(Value::as_object) else {
            continue;
        };
        for observations in all_series
            .values()
            .filter_map(|entry| entry.get("observations").and_then(Value::as_object))
        {
            for (index, raw) in observations {
                let Some(period) = index
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| time_periods.get(index))
                    .and_then(|label| parse_period(label))
                else {
                    continue;
                };
                let Some(thousand_ounces) = observation_value(raw) else {
                    continue;
                };
                let tonnes = round2(thousand_ounces * KG_PER_TROY_OUNCE / 1000.0);
                if tonnes > 0.0 {
                    series.push((period, tonnes));
                }
            }
        }
    }
    Ok(series)
}

fn time_periods(data: &Value) -> Vec<String> {
    data.get("structures")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|structure| structure.pointer("/dimensions/observation")?.as_array())
        .flatten()
        .find(|dimension| dimension.get("id").and_then(Value::as_str) == Some("TIME_PERIOD"))
        .and_then(|dimension| dimension.get("values")?.as_array())
        .map(|values| {
            values
                .iter()
                .map(|value| {
                    value
                        .get("value")
                        .or_else(|| value.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `2025-M01` or `2025-01`.
fn parse_period(label: &str) -> Option<Period> {
    Period::parse(&label.replace("-M", "-")).ok()
}

/// First element of the positional array (or a bare value), as a number.
fn observation_value(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
