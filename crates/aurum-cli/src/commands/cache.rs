use aurum_core::MarketDataService;
use serde_json::json;

use super::CommandResult;
use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

pub async fn run(args: &CacheArgs, service: &MarketDataService) -> Result<CommandResult, CliError> {
    match args.command {
        CacheCommand::Clear => {
            service.clear_cache().await?;
            Ok(CommandResult::ok(json!({ "cleared": true })))
        }
    }
}
