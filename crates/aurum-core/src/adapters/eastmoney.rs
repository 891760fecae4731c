use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::transport::{AdapterTransport, TransportSettings};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{
    BatchOutcome, BatchProvider, Provider, ProviderFuture, RequestContext, SourceError,
};
use crate::{Entity, EntityClass, Market, Observation, ObservationValue, ProviderId};

const BASE_URL: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";
const FIELDS: &str = "f2,f3,f5,f12,f13,f14,f15,f16,f59";

/// Quotes from the Eastmoney `ulist` endpoint, many securities per call.
#[derive(Clone)]
pub struct EastmoneyAdapter {
    transport: AdapterTransport,
    base_url: String,
}

impl EastmoneyAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_settings(http_client, TransportSettings::default())
    }

    pub fn with_settings(http_client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        Self {
            transport: AdapterTransport::new(ProviderId::Eastmoney, http_client, settings),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_batch(
        &self,
        entities: &[Entity],
        ctx: &RequestContext,
    ) -> Result<BatchOutcome, SourceError> {
        let mut outcome = BatchOutcome::new();
        let mut by_secid: HashMap<String, &Entity> = HashMap::new();
        for entity in entities {
            match secid(entity) {
                Some(secid) => {
                    by_secid.insert(secid, entity);
                }
                None => {
                    outcome.insert(
                        entity.clone(),
                        Err(SourceError::not_found(format!(
                            "eastmoney does not list '{entity}' in market {}",
                            entity.market()
                        ))),
                    );
                }
            }
        }
        if by_secid.is_empty() {
            return Ok(outcome);
        }

        let mut secids: Vec<&str> = by_secid.keys().map(String::as_str).collect();
        secids.sort_unstable();
        let url = format!(
            "{}?fltt=1&secids={}&fields={FIELDS}",
            self.base_url,
            urlencoding::encode(&secids.join(","))
        );
        let payload: Value = self.transport.get_json(HttpRequest::get(url), ctx).await?;

        for item in diff_items(&payload)? {
            let Some(key) = item_secid(item) else {
                continue;
            };
            let Some(entity) = by_secid.remove(&key) else {
                continue;
            };
            outcome.insert(entity.clone(), parse_item(entity, item, ctx));
        }
        Ok(outcome)
    }
}

impl Provider for EastmoneyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Eastmoney
    }

    fn supported_class(&self) -> EntityClass {
        EntityClass::Quote
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
            self.fetch_batch(std::slice::from_ref(entity), ctx)
                .await?
                .remove(entity)
                .unwrap_or_else(|| {
                    Err(SourceError::not_found(format!(
                        "eastmoney returned no row for '{entity}'"
                    )))
                })
        })
    }

    fn batch(&self) -> Option<&dyn BatchProvider> {
        Some(self)
    }
}

impl BatchProvider for EastmoneyAdapter {
    fn fetch_many<'a>(
        &'a self,
        entities: &'a [Entity],
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<BatchOutcome, SourceError>> {
        Box::pin(self.fetch_batch(entities, ctx))
    }
}

/// Eastmoney security id: `{market id}.{code}`.
fn secid(entity: &Entity) -> Option<String> {
    let code = entity.code();
    match entity.market() {
        Market::Cn => {
            if let Some(rest) = code.strip_prefix("SH") {
                Some(format!("1.{rest}"))
            } else if let Some(rest) = code.strip_prefix("SZ").or_else(|| code.strip_prefix("BJ")) {
                Some(format!("0.{rest}"))
            } else if code.starts_with('6') || code.starts_with('9') {
                Some(format!("1.{code}"))
            } else {
                Some(format!("0.{code}"))
            }
        }
        Market::Hk => Some(format!("116.{}", code.strip_prefix("HK").unwrap_or(code))),
        Market::Us => Some(format!("105.{code}")),
        _ => None,
    }
}

/// `data.diff` is a list on most responses and an index-keyed object on some.
fn diff_items(payload: &Value) -> Result<Vec<&Value>, SourceError> {
    match payload.pointer("/data/diff") {
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(Value::Object(items)) => Ok(items.values().collect()),
        _ if payload.get("data").is_some_and(Value::is_null) => Ok(Vec::new()),
        _ => Err(SourceError::invalid_response(
            "eastmoney response has no data.diff",
        )),
    }
}

fn item_secid(item: &Value) -> Option<String> {
    let code = item.get("f12")?.as_str()?;
    let market = item.get("f13")?.as_i64()?;
    Some(format!("{market}.{code}"))
}

fn parse_item(entity: &Entity, item: &Value, ctx: &RequestContext) -> Result<Observation, SourceError> {
    let decimals = item.get("f59").and_then(Value::as_i64).unwrap_or(2);
    let scale = 10_f64.powi(i32::try_from(decimals).unwrap_or(2));
    let scaled = |field: &str| number(item, field).map(|raw| raw / scale);

    let price = scaled("f2").ok_or_else(|| {
        SourceError::not_found(format!("eastmoney has no last price for '{entity}'"))
    })?;
    let value = ObservationValue::Quote {
        price,
        change_percent: number(item, "f3").map(|raw| raw / 100.0),
        high: scaled("f15"),
        low: scaled("f16"),
        volume: number(item, "f5"),
    };

    let mut named = entity.clone();
    if let Some(name) = item.get("f14").and_then(Value::as_str) {
        named = named.with_name(name);
    }
    Ok(Observation::new(
        named,
        ctx.current_period(entity),
        value,
        ProviderId::Eastmoney,
        ctx.as_of(),
    )?)
}

/// Numeric field; `"-"` marks a missing value.
fn number(item: &Value, field: &str) -> Option<f64> {
    match item.get(field)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{ctx_at, RecordingHttpClient};

    const TWO_ROWS: &str = r#"{"rc":0,"data":{"total":2,"diff":[
        {"f2":152050,"f3":123,"f5":31000,"f12":"600519","f13":1,"f14":"Kweichow Moutai","f15":153000,"f16":150010,"f59":2},
        {"f2":"-","f3":"-","f5":"-","f12":"000001","f13":0,"f14":"Ping An Bank","f15":"-","f16":"-","f59":2}
    ]}}"#;

    #[tokio::test]
    async fn one_call_answers_every_entity_in_the_batch() {
        let client = RecordingHttpClient::responding(TWO_ROWS);
        let adapter = EastmoneyAdapter::new(client.clone());
        let moutai = Entity::quote("SH600519", None).expect("entity");
        let ping_an = Entity::quote("SZ000001", None).expect("entity");
        let ctx = ctx_at("2026-03-10T02:00:00Z");

        let outcome = adapter
            .fetch_many(&[moutai.clone(), ping_an.clone()], &ctx)
            .await
            .expect("batch succeeds");

        let observation = outcome[&moutai].as_ref().expect("moutai priced");
        assert_eq!(observation.primary_value(), 1520.5);
        assert_eq!(observation.entity.name(), Some("Kweichow Moutai"));
        assert_eq!(observation.period.key(), "2026-03-10");
        match &observation.value {
            ObservationValue::Quote {
                change_percent,
                high,
                ..
            } => {
                assert_eq!(*change_percent, Some(1.23));
                assert_eq!(*high, Some(1530.0));
            }
            other => panic!("unexpected value {other:?}"),
        }

        let suspended = outcome[&ping_an].as_ref().expect_err("no price");
        assert_eq!(suspended.code(), "source.not_found");

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("secids=0.000001%2C1.600519"));
    }

    #[tokio::test]
    async fn object_shaped_diff_is_accepted() {
        let client = RecordingHttpClient::responding(
            r#"{"data":{"diff":{"0":{"f2":38040,"f3":-52,"f12":"00700","f13":116,"f14":"Tencent","f59":2}}}}"#,
        );
        let adapter = EastmoneyAdapter::new(client);
        let tencent = Entity::quote("HK00700", None).expect("entity");

        let observation = adapter
            .fetch_one(&tencent, &ctx_at("2026-03-10T02:00:00Z"))
            .await
            .expect("quote parses");
        assert_eq!(observation.primary_value(), 380.4);
    }

    #[tokio::test]
    async fn unlisted_markets_fail_without_a_request() {
        let client = RecordingHttpClient::responding("{}");
        let adapter = EastmoneyAdapter::new(client.clone());
        let fund = Entity::quote("161725", None).expect("entity");

        let outcome = adapter
            .fetch_many(std::slice::from_ref(&fund), &ctx_at("2026-03-10T02:00:00Z"))
            .await
            .expect("call succeeds");

        assert!(outcome[&fund].is_err());
        assert!(client.recorded_requests().is_empty());
    }

    #[test]
    fn secids_follow_exchange_prefixes() {
        let secid_of = |code: &str| secid(&Entity::quote(code, None).expect("entity"));
        assert_eq!(secid_of("SH600519").as_deref(), Some("1.600519"));
        assert_eq!(secid_of("SZ000001").as_deref(), Some("0.000001"));
        assert_eq!(secid_of("HK00700").as_deref(), Some("116.00700"));
        assert_eq!(secid_of("AAPL").as_deref(), Some("105.AAPL"));
    }
}
