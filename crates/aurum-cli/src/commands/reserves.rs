use std::collections::HashSet;

use aurum_core::{Entity, MarketDataService};

use super::CommandResult;
use crate::cli::ReservesArgs;
use crate::error::CliError;
use crate::output::EntityError;

pub async fn run(args: &ReservesArgs, service: &MarketDataService) -> Result<CommandResult, CliError> {
    let entities = args
        .countries
        .iter()
        .map(|country| Entity::reserve(country))
        .collect::<Result<Vec<_>, _>>()?;

    let report = service.get_latest_reserves(&entities, args.force).await?;

    // A failed refresh is only an error when nothing is stored to fall back on.
    let served: HashSet<String> = report
        .reserves
        .iter()
        .map(|view| view.observation.entity.id())
        .collect();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for decision in &report.refresh {
        let Some(message) = &decision.error else {
            continue;
        };
        if served.contains(&decision.entity_id) {
            warnings.push(format!(
                "{}: refresh failed, serving stored data: {message}",
                decision.entity_id
            ));
        } else {
            errors.push(EntityError {
                entity_id: decision.entity_id.clone(),
                reason: String::from("all_providers_failed"),
                attempts: Vec::new(),
            });
            warnings.push(format!("{}: {message}", decision.entity_id));
        }
    }

    Ok(CommandResult::ok(serde_json::to_value(&report)?)
        .with_warnings(warnings)
        .with_errors(errors))
}
