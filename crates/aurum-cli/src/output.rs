use std::fmt::{Display, Formatter};
use std::io::Write;

use aurum_core::{AttemptError, ProviderId, RouteFailure, UtcDateTime};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::CliError;

/// Request identifier (UUID v4) stamped on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Top-level JSON document written to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
    pub errors: Vec<EntityError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub request_id: RequestId,
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
}

/// An entity the command could not answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityError {
    pub entity_id: String,
    pub reason: String,
    pub attempts: Vec<AttemptView>,
}

impl EntityError {
    pub fn from_failure(entity_id: String, failure: &RouteFailure) -> Self {
        Self {
            entity_id,
            reason: failure.reason.as_str().to_owned(),
            attempts: failure.errors.iter().map(AttemptView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptView {
    pub provider: ProviderId,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&AttemptError> for AttemptView {
    fn from(attempt: &AttemptError) -> Self {
        Self {
            provider: attempt.provider,
            code: attempt.error.code(),
            message: attempt.error.message().to_owned(),
            retryable: attempt.error.retryable(),
        }
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if pretty {
        serde_json::to_writer_pretty(&mut handle, envelope)?;
    } else {
        serde_json::to_writer(&mut handle, envelope)?;
    }
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use aurum_core::{FailureReason, SourceError};

    use super::*;

    #[test]
    fn failures_list_every_attempt() {
        let failure = RouteFailure {
            source_chain: vec![ProviderId::Frankfurter, ProviderId::ExchangeRateApi],
            errors: vec![
                AttemptError {
                    provider: ProviderId::Frankfurter,
                    error: SourceError::unavailable("http status 503"),
                },
                AttemptError {
                    provider: ProviderId::ExchangeRateApi,
                    error: SourceError::not_found("unknown currency"),
                },
            ],
            reason: FailureReason::AllProvidersFailed,
        };

        let error = EntityError::from_failure(String::from("rate:USD/XXX"), &failure);
        let json = serde_json::to_value(&error).expect("serializes");

        assert_eq!(json["reason"], "all_providers_failed");
        assert_eq!(json["attempts"][0]["code"], "source.unavailable");
        assert_eq!(json["attempts"][0]["retryable"], true);
        assert_eq!(json["attempts"][1]["message"], "unknown currency");
    }

    #[test]
    fn request_ids_are_hyphenated_uuids() {
        let id = RequestId::new_v4().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }
}
