use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::transport::{AdapterTransport, TransportSettings};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{Provider, ProviderFuture, RequestContext, SourceError};
use crate::{Entity, EntityClass, Observation, ObservationValue, ProviderId};

const BASE_URL: &str = "https://api.frankfurter.app";

/// ECB reference rates from frankfurter.app.
#[derive(Clone)]
pub struct FrankfurterAdapter {
    transport: AdapterTransport,
    base_url: String,
}

impl FrankfurterAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_settings(http_client, TransportSettings::default())
    }

    pub fn with_settings(http_client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        Self {
            transport: AdapterTransport::new(ProviderId::Frankfurter, http_client, settings),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_rate(
        &self,
        entity: &Entity,
        ctx: &RequestContext,
    ) -> Result<Observation, SourceError> {
        let (base, quote) = entity
            .currency_pair()
            .ok_or_else(|| SourceError::unsupported_class(ProviderId::Frankfurter, entity))?;
        let url = format!(
            "{}/latest?from={}&to={}",
            self.base_url,
            urlencoding::encode(base),
            urlencoding::encode(quote)
        );

        let payload: LatestPayload = self.transport.get_json(HttpRequest::get(url), ctx).await?;
        let rate = payload.rates.get(quote).copied().ok_or_else(|| {
            SourceError::not_found(format!("frankfurter has no {quote} rate for {base}"))
        })?;

        Ok(Observation::new(
            entity.clone(),
            ctx.current_period(entity),
            ObservationValue::rate(rate),
            ProviderId::Frankfurter,
            ctx.as_of(),
        )?)
    }
}

impl Provider for FrankfurterAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Frankfurter
    }

    fn supported_class(&self) -> EntityClass {
        EntityClass::Rate
    }

    fn is_available(&self) -> bool {
        self.transport.is_available()
    }

    fn fetch_one<'a>(
        &'a self,
        entity: &'a Entity,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Observation, SourceError>> {
        Box::pin(self.fetch_rate(entity, ctx))
    }
}

#[derive(Debug, Deserialize)]
struct LatestPayload {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{ctx_at, RecordingHttpClient};

    #[tokio::test]
    async fn reads_the_requested_rate_for_the_current_month() {
        let client = RecordingHttpClient::responding(
            r#"{"amount":1.0,"base":"USD","date":"2026-03-09","rates":{"CNY":7.1932}}"#,
        );
        let adapter = FrankfurterAdapter::new(client.clone());
        let entity = Entity::rate("USD", "CNY").expect("entity");

        let observation = adapter
            .fetch_one(&entity, &ctx_at("2026-03-10T02:00:00Z"))
            .await
            .expect("rate parses");

        assert_eq!(observation.primary_value(), 7.1932);
        assert_eq!(observation.period.key(), "2026-03");
        assert_eq!(observation.source, ProviderId::Frankfurter);
        assert_eq!(
            client.recorded_requests()[0].url,
            "https://api.frankfurter.app/latest?from=USD&to=CNY"
        );
    }

    #[tokio::test]
    async fn missing_currency_is_not_found() {
        let client = RecordingHttpClient::responding(r#"{"base":"USD","rates":{}}"#);
        let adapter = FrankfurterAdapter::new(client);
        let entity = Entity::rate("USD", "XAU").expect("entity");

        let error = adapter
            .fetch_one(&entity, &ctx_at("2026-03-10T02:00:00Z"))
            .await
            .expect_err("no rate");
        assert_eq!(error.code(), "source.not_found");
    }
}
