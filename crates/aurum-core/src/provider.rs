//! Provider contract and request context.
//!
//! Every upstream integration implements [`Provider`] for exactly one entity
//! class. Capabilities beyond single-entity fetch are exposed by returning a
//! trait object from [`Provider::batch`] or [`Provider::history`]; the
//! orchestrator dispatches on which capability is present, never on the
//! concrete type.
//!
//! | Capability | Trait | Used by |
//! |------------|-------|---------|
//! | fetch one | [`Provider`] | every group without a batch endpoint |
//! | fetch many | [`BatchProvider`] | groups sharing class and market |
//! | history | [`HistoryProvider`] | backfill |

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::{Entity, Granularity, Observation, Period, ProviderId, UtcDateTime, ValidationError};

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a batch call: one entry per requested entity the provider answered.
pub type BatchOutcome = HashMap<Entity, Result<Observation, SourceError>>;

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidResponse,
    Validation,
    NotFound,
    UnsupportedClass,
    ProviderNotRegistered,
    DeadlineExceeded,
    Internal,
}

/// Structured provider failure recorded per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::RateLimited, message, true)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidResponse, message, false)
    }

    pub fn validation(error: &ValidationError) -> Self {
        Self::with_kind(SourceErrorKind::Validation, error.to_string(), false)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::NotFound, message, false)
    }

    pub fn unsupported_class(provider: ProviderId, entity: &Entity) -> Self {
        Self::with_kind(
            SourceErrorKind::UnsupportedClass,
            format!("provider '{provider}' cannot serve {} entities", entity.class()),
            false,
        )
    }

    pub fn provider_not_registered(provider: ProviderId) -> Self {
        Self::with_kind(
            SourceErrorKind::ProviderNotRegistered,
            format!("provider '{provider}' is not registered"),
            false,
        )
    }

    pub fn deadline_exceeded() -> Self {
        Self::with_kind(
            SourceErrorKind::DeadlineExceeded,
            "fetch deadline elapsed before the provider answered",
            false,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Internal, message, false)
    }

    fn with_kind(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Validation => "source.validation",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::UnsupportedClass => "source.unsupported_class",
            SourceErrorKind::ProviderNotRegistered => "source.provider_not_registered",
            SourceErrorKind::DeadlineExceeded => "source.deadline_exceeded",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::validation(&error)
    }
}

/// Per-call context threaded through every provider invocation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    as_of: UtcDateTime,
    deadline: Option<Instant>,
    calendar: Arc<TradingCalendar>,
}

impl RequestContext {
    pub fn new(as_of: UtcDateTime, calendar: Arc<TradingCalendar>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            as_of,
            deadline: None,
            calendar,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Fetch time stamped on observations produced for this request.
    pub const fn as_of(&self) -> UtcDateTime {
        self.as_of
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }

    /// Period a fresh observation of `entity` belongs to: the market-local
    /// trading date for quotes, the current UTC month otherwise.
    pub fn current_period(&self, entity: &Entity) -> Period {
        match entity.class().granularity() {
            Granularity::Day => Period::day(self.calendar.local_date(entity.market(), self.as_of)),
            Granularity::Month => Period::month_of(self.as_of.date_at(time::UtcOffset::UTC)),
        }
    }
}

/// An upstream able to answer fetch requests for entities of one class.
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supported_class(&self) -> crate::EntityClass;

    /// Cheap liveness probe; `false` removes the provider from contention.
    fn is_available(&self) -> bool {
        true
    }

    fn fetch_one<'a>(
        &'a self,
        entity: &'a Entity,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Observation, SourceError>>;

    fn batch(&self) -> Option<&dyn BatchProvider> {
        None
    }

    fn history(&self) -> Option<&dyn HistoryProvider> {
        None
    }
}

/// Providers with an endpoint that accepts many identifiers in one call.
///
/// A whole-call error fails every requested entity for this provider; an
/// entity missing from the returned map is treated as failed as well.
pub trait BatchProvider: Send + Sync {
    fn fetch_many<'a>(
        &'a self,
        entities: &'a [Entity],
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<BatchOutcome, SourceError>>;
}

/// Providers that can return past periods, most recent first.
pub trait HistoryProvider: Send + Sync {
    fn fetch_history<'a>(
        &'a self,
        entity: &'a Entity,
        periods: u32,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Vec<Observation>, SourceError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SourceError::unavailable("down").code(), "source.unavailable");
        assert!(SourceError::rate_limited("slow down").retryable());
        assert!(!SourceError::invalid_response("garbage").retryable());
        assert_eq!(
            SourceError::provider_not_registered(ProviderId::Imf).to_string(),
            "provider 'imf' is not registered (source.provider_not_registered)"
        );
        let error: SourceError = ValidationError::EmptyCode.into();
        assert_eq!(error.kind(), SourceErrorKind::Validation);
    }

    #[test]
    fn current_period_follows_class_granularity() {
        let as_of = UtcDateTime::parse("2025-12-31T20:00:00Z").expect("timestamp");
        let ctx = RequestContext::new(as_of, Arc::new(TradingCalendar::default()));

        let quote = Entity::quote("SH600519", None).expect("quote");
        assert_eq!(ctx.current_period(&quote).key(), "2026-01-01");

        let rate = Entity::rate("USD", "CNY").expect("rate");
        assert_eq!(ctx.current_period(&rate).key(), "2025-12");
    }

    #[tokio::test]
    async fn remaining_budget_counts_down_to_zero() {
        let ctx = RequestContext::new(UtcDateTime::now(), Arc::new(TradingCalendar::default()));
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());

        let ctx = ctx.with_deadline(Some(Instant::now()));
        assert!(ctx.is_expired());
    }
}
