use aurum_core::{Entity, MarketDataService};
use serde_json::json;

use super::CommandResult;
use crate::cli::HistoryArgs;
use crate::error::CliError;

pub async fn run(args: &HistoryArgs, service: &MarketDataService) -> Result<CommandResult, CliError> {
    let entity = Entity::parse_id(&args.entity)?;
    let observations = service.get_history(&entity, args.periods).await?;

    Ok(CommandResult::ok(json!({
        "entity_id": entity.id(),
        "observations": observations,
    })))
}
