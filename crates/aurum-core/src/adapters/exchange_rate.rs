use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::transport::{AdapterTransport, TransportSettings};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{Provider, ProviderFuture, RequestContext, SourceError};
use crate::{Entity, EntityClass, Observation, ObservationValue, ProviderId};

const BASE_URL: &str = "https://open.er-api.com/v6";

/// Keyless rates from open.er-api.com.
#[derive(Clone)]
pub struct ExchangeRateApiAdapter {
    transport: AdapterTransport,
    base_url: String,
}

impl ExchangeRateApiAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_settings(http_client, TransportSettings::default())
    }

    pub fn with_settings(http_client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        Self {
            transport: AdapterTransport::new(ProviderId::ExchangeRateApi, http_client, settings),
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
            .ok_or_else(|| SourceError::unsupported_class(ProviderId::ExchangeRateApi, entity))?;
        let url = format!("{}/latest/{}", self.base_url, urlencoding::encode(base));

        let payload: LatestPayload = self.transport.get_json(HttpRequest::get(url), ctx).await?;
        if payload.result.as_deref() != Some("success") {
            return Err(SourceError::invalid_response(format!(
                "exchange_rate_api answered '{}' for {base}",
                payload.error_type.as_deref().unwrap_or("unknown error")
            )));
        }
        let rate = payload.rates.get(quote).copied().ok_or_else(|| {
            SourceError::not_found(format!("exchange_rate_api has no {quote} rate for {base}"))
        })?;

        Ok(Observation::new(
            entity.clone(),
            ctx.current_period(entity),
            ObservationValue::rate(rate),
            ProviderId::ExchangeRateApi,
            ctx.as_of(),
        )?)
    }
}

impl Provider for ExchangeRateApiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::ExchangeRateApi
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
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
}
