use std::sync::Arc;

use super::transport::{AdapterTransport, TransportSettings};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{Provider, ProviderFuture, RequestContext, SourceError};
use crate::{Entity, EntityClass, Market, Observation, ObservationValue, ProviderId};

const BASE_URL: &str = "https://hq.sinajs.cn";
const REFERER: &str = "https://finance.sina.com.cn/";

/// Quotes from the Sina `hq_str` text feed, one security per call.
#[derive(Clone)]
pub struct SinaAdapter {
    transport: AdapterTransport,
    base_url: String,
}

impl SinaAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_settings(http_client, TransportSettings::default())
    }

    pub fn with_settings(http_client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        Self {
            transport: AdapterTransport::new(ProviderId::Sina, http_client, settings),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_quote(
        &self,
        entity: &Entity,
        ctx: &RequestContext,
    ) -> Result<Observation, SourceError> {
        let symbol = sina_symbol(entity).ok_or_else(|| {
            SourceError::not_found(format!(
                "sina does not list '{entity}' in market {}",
                entity.market()
            ))
        })?;
        let request = HttpRequest::get(format!("{}/list={symbol}", self.base_url))
            .with_header("Referer", REFERER);
        let body = self.transport.get_text(request, ctx).await?;

        let fields = quoted_fields(&body, &symbol).ok_or_else(|| {
            SourceError::not_found(format!("sina returned an empty record for '{entity}'"))
        })?;
        let parsed = parse_fields(entity.market(), &fields)?;

        let mut named = entity.clone();
        if let Some(name) = parsed.name {
            named = named.with_name(name);
        }
        Ok(Observation::new(
            named,
            ctx.current_period(entity),
            parsed.value,
            ProviderId::Sina,
            ctx.as_of(),
        )?)
    }
}

impl Provider for SinaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Sina
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
        Box::pin(self.fetch_quote(entity, ctx))
    }
}

fn sina_symbol(entity: &Entity) -> Option<String> {
    let code = entity.code().to_ascii_lowercase();
    match entity.market() {
        Market::Cn if code.starts_with("sh") || code.starts_with("sz") || code.starts_with("bj") => {
            Some(code)
        }
        Market::Cn if code.starts_with('6') || code.starts_with('9') => Some(format!("sh{code}")),
        Market::Cn => Some(format!("sz{code}")),
        Market::Hk if code.starts_with("hk") => Some(code),
        Market::Hk => Some(format!("hk{code}")),
        Market::Us => Some(format!("gb_{}", code.replace('.', "$"))),
        _ => None,
    }
}

/// Comma-separated payload of `var hq_str_{symbol}="...";`, `None` when empty.
fn quoted_fields(body: &str, symbol: &str) -> Option<Vec<String>> {
    let marker = format!("hq_str_{symbol}=\"");
    let start = body.find(&marker)? + marker.len();
    let rest = &body[start..];
    let payload = &rest[..rest.find('"')?];
    if payload.trim().is_empty() {
        return None;
    }
    Some(payload.split(',').map(|field| field.trim().to_owned()).collect())
}

struct ParsedQuote {
    name: Option<String>,
    value: ObservationValue,
}

fn parse_fields(market: Market, fields: &[String]) -> Result<ParsedQuote, SourceError> {
    let text = |index: usize| fields.get(index).map(String::as_str).filter(|v| !v.is_empty());
    let number = |index: usize| text(index).and_then(|value| value.parse::<f64>().ok());
    let required = |index: usize, field: &str| {
        number(index).ok_or_else(|| {
            SourceError::invalid_response(format!("sina record has no numeric {field} at field {index}"))
        })
    };

    let (name, value) = match market {
        Market::Hk => (
            text(1),
            ObservationValue::Quote {
                price: required(6, "last price")?,
                change_percent: number(8),
                high: number(4),
                low: number(5),
                volume: number(12),
            },
        ),
        Market::Us => (
            text(0),
            ObservationValue::Quote {
                price: required(1, "price")?,
                change_percent: number(2),
                high: number(6),
                low: number(7),
                volume: number(10),
            },
        ),
        _ => {
            let previous_close = number(2).filter(|close| *close > 0.0);
            let price = required(3, "price")?;
            (
                text(0),
                ObservationValue::Quote {
                    price,
                    change_percent: previous_close
                        .map(|close| (price - close) * 100.0 / close),
                    high: number(4),
                    low: number(5),
                    volume: number(8),
                },
            )
        }
    };

    Ok(ParsedQuote {
        name: name.map(str::to_owned),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{ctx_at, RecordingHttpClient};

    #[tokio::test]
    async fn parses_mainland_record_and_sends_referer() {
        let client = RecordingHttpClient::responding(
            "var hq_str_sh600519=\"Moutai,1500.00,1500.00,1530.00,1540.00,1495.00,1529.99,1530.00,3100000\";\n",
        );
        let adapter = SinaAdapter::new(client.clone());
        let entity = Entity::quote("SH600519", None).expect("entity");

        let observation = adapter
            .fetch_one(&entity, &ctx_at("2026-03-10T02:00:00Z"))
            .await
            .expect("record parses");

        assert_eq!(observation.primary_value(), 1530.0);
        assert_eq!(observation.entity.name(), Some("Moutai"));
        match observation.value {
            ObservationValue::Quote { change_percent, volume, .. } => {
                assert_eq!(change_percent, Some(2.0));
                assert_eq!(volume, Some(3_100_000.0));
            }
            other => panic!("unexpected value {other:?}"),
        }

        let request = &client.recorded_requests()[0];
        assert_eq!(request.url, "https://hq.sinajs.cn/list=sh600519");
        assert_eq!(request.headers.get("referer").map(String::as_str), Some(REFERER));
    }

    #[tokio::test]
    async fn empty_record_is_not_found() {
        let client = RecordingHttpClient::responding("var hq_str_gb_zzzz=\"\";\n");
        let adapter = SinaAdapter::new(client);
        let entity = Entity::quote("ZZZZ", None).expect("entity");

        let error = adapter
            .fetch_one(&entity, &ctx_at("2026-03-10T15:00:00Z"))
            .await
            .expect_err("unknown ticker");
        assert_eq!(error.code(), "source.not_found");
    }

    #[test]
    fn hong_kong_layout_reads_last_price_from_field_six() {
        let fields: Vec<String> = "TENCENT,Tencent Holdings,380.0,382.0,385.0,378.5,380.4,-0.42,-0.42"
            .split(',')
            .map(str::to_owned)
            .collect();

        let parsed = parse_fields(Market::Hk, &fields).expect("parses");
        assert_eq!(parsed.name.as_deref(), Some("Tencent Holdings"));
        assert_eq!(parsed.value.primary(), 380.4);
    }
}
