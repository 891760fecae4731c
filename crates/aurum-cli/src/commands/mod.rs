mod backfill;
mod cache;
mod history;
mod quote;
mod rate;
mod reserves;
mod watch;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use aurum_core::{AppConfig, Clock, Entity, MarketDataService, RouteResult, SystemClock};
use serde_json::{json, Value};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::{EntityError, Envelope, Meta, RequestId};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EntityError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<EntityError>) -> Self {
        self.errors.extend(errors);
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let started = Instant::now();
    let config = AppConfig::load(cli.config.as_deref())?;
    let mut service = MarketDataService::from_config(&config).await?;
    if let Some(deadline_ms) = cli.deadline_ms {
        service = service.with_default_deadline(Some(Duration::from_millis(deadline_ms)));
    }
    let mode = cli.cache.into();

    let (command, result) = match &cli.command {
        Command::Quote(args) => ("quote", quote::run(args, &service, mode).await?),
        Command::Rate(args) => ("rate", rate::run(args, &service, mode).await?),
        Command::Reserves(args) => ("reserves", reserves::run(args, &service).await?),
        Command::History(args) => ("history", history::run(args, &service).await?),
        Command::Backfill(args) => ("backfill", backfill::run(args, &service).await?),
        Command::Watch(args) => ("watch", watch::run(args, &service).await?),
        Command::Cache(args) => ("cache", cache::run(args, &service).await?),
    };

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::debug!(
        command,
        latency_ms,
        errors = result.errors.len(),
        "command finished"
    );

    Ok(Envelope {
        meta: Meta {
            request_id: RequestId::new_v4(),
            command,
            generated_at: SystemClock.now(),
            latency_ms,
            warnings: result.warnings,
        },
        data: result.data,
        errors: result.errors,
    })
}

/// One JSON row per requested entity that was answered, in request order;
/// unanswered entities become envelope errors.
pub(crate) fn route_report(
    entities: &[Entity],
    mut results: HashMap<Entity, RouteResult>,
) -> CommandResult {
    let mut rows = Vec::with_capacity(entities.len());
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for entity in entities {
        let Some(result) = results.remove(entity) else {
            continue;
        };
        match result {
            Ok(success) => {
                for attempt in &success.errors {
                    warnings.push(format!(
                        "{}: {} failed before {} answered: {}",
                        entity.id(),
                        attempt.provider,
                        success.selected_source,
                        attempt.error
                    ));
                }
                rows.push(json!({
                    "entity_id": entity.id(),
                    "observation": success.observation,
                    "source": success.selected_source,
                    "source_chain": success.source_chain,
                    "from_cache": success.from_cache,
                }));
            }
            Err(failure) => errors.push(EntityError::from_failure(entity.id(), &failure)),
        }
    }

    CommandResult::ok(Value::Array(rows))
        .with_warnings(warnings)
        .with_errors(errors)
}
