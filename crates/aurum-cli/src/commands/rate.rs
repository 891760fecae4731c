use aurum_core::{common_rate_pairs, CacheMode, Entity, MarketDataService, ValidationError};

use super::{route_report, CommandResult};
use crate::cli::RateArgs;
use crate::error::CliError;

pub async fn run(
    args: &RateArgs,
    service: &MarketDataService,
    mode: CacheMode,
) -> Result<CommandResult, CliError> {
    let mut entities = Vec::new();
    for pair in &args.pairs {
        for entity in expand_pair(pair)? {
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }
    }

    let results = service.get_rates(&entities, mode).await?;
    Ok(route_report(&entities, results))
}

/// A bare base such as `USD` expands to every common pair against it.
fn expand_pair(input: &str) -> Result<Vec<Entity>, ValidationError> {
    let trimmed = input.trim();
    if trimmed.len() == 3 {
        return common_rate_pairs(trimmed);
    }
    parse_pair(trimmed).map(|entity| vec![entity])
}

/// `USD/CNY` or `USDCNY`.
fn parse_pair(input: &str) -> Result<Entity, ValidationError> {
    let trimmed = input.trim();
    if let Some((base, quote)) = trimmed.split_once('/') {
        return Entity::rate(base, quote);
    }
    if trimmed.len() == 6 && trimmed.is_ascii() {
        let (base, quote) = trimmed.split_at(3);
        return Entity::rate(base, quote);
    }
    Err(ValidationError::InvalidCurrency {
        value: trimmed.to_owned(),
    })
}
