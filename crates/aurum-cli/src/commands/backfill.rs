use aurum_core::{Entity, MarketDataService};

use super::CommandResult;
use crate::cli::BackfillArgs;
use crate::error::CliError;

pub async fn run(args: &BackfillArgs, service: &MarketDataService) -> Result<CommandResult, CliError> {
    let entity = Entity::parse_id(&args.entity)?;
    let report = service.backfill(&entity, args.periods).await?;

    tracing::info!(
        entity = %entity,
        fetched = report.fetched,
        written = report.written,
        "backfill finished"
    );
    Ok(CommandResult::ok(serde_json::to_value(&report)?))
}
