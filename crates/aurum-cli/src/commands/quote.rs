use aurum_core::{CacheMode, Entity, Market, MarketDataService};

use super::{route_report, CommandResult};
use crate::cli::QuoteArgs;
use crate::error::CliError;

pub async fn run(
    args: &QuoteArgs,
    service: &MarketDataService,
    mode: CacheMode,
) -> Result<CommandResult, CliError> {
    let market = args
        .market
        .as_deref()
        .map(str::parse::<Market>)
        .transpose()?;
    let entities = args
        .codes
        .iter()
        .map(|code| Entity::quote(code, market))
        .collect::<Result<Vec<_>, _>>()?;

    let results = service.get_quotes(&entities, mode).await?;
    Ok(route_report(&entities, results))
}
