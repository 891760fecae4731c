use aurum_core::{Entity, EntityClass, MarketDataService};
use serde_json::json;

use super::CommandResult;
use crate::cli::{WatchArgs, WatchCommand};
use crate::error::CliError;

pub async fn run(args: &WatchArgs, service: &MarketDataService) -> Result<CommandResult, CliError> {
    match &args.command {
        WatchCommand::Add { entities } => {
            let entities = parse_all(entities)?;
            for entity in &entities {
                service.watch(entity).await?;
            }
            Ok(CommandResult::ok(json!({
                "registered": entities.iter().map(Entity::id).collect::<Vec<_>>(),
            })))
        }
        WatchCommand::Remove { entities } => {
            let mut removed = Vec::new();
            let mut unknown = Vec::new();
            for entity in parse_all(entities)? {
                if service.unwatch(&entity).await? {
                    removed.push(entity.id());
                } else {
                    unknown.push(entity.id());
                }
            }
            let warnings = unknown
                .iter()
                .map(|id| format!("{id} was not registered"))
                .collect();
            Ok(CommandResult::ok(json!({ "removed": removed })).with_warnings(warnings))
        }
        WatchCommand::List { class } => {
            let class = class.as_deref().map(str::parse::<EntityClass>).transpose()?;
            let entities = service.watchlist(class).await?;
            Ok(CommandResult::ok(json!({ "entities": entities })))
        }
    }
}

fn parse_all(ids: &[String]) -> Result<Vec<Entity>, CliError> {
    Ok(ids
        .iter()
        .map(|id| Entity::parse_id(id))
        .collect::<Result<Vec<_>, _>>()?)
}
