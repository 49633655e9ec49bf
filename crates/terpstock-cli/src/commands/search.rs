use serde::Serialize;
use terpstock_core::query::{SearchHit, SearchQuery};
use terpstock_core::{SnapshotDate, TerpstockConfig};

use crate::cli::SearchArgs;
use crate::error::CliError;

use super::{build_service, CommandOutput};

#[derive(Debug, Serialize)]
struct SearchResponseData {
    query: String,
    snapshot_date: Option<SnapshotDate>,
    results: Vec<SearchHit>,
}

pub async fn run(args: &SearchArgs, config: &TerpstockConfig) -> Result<CommandOutput, CliError> {
    if args.limit == Some(0) {
        return Err(CliError::Command(String::from("--limit must be greater than zero")));
    }

    let service = build_service(config)?;
    let snapshot_date = service.warm_start().await?;
    let query = SearchQuery::new(args.fragment.clone())
        .with_dispensary(args.dispensary)
        .with_category(args.category.clone())
        .with_limit(args.limit);
    let results = service.query().search(&query)?;

    let data = serde_json::to_value(SearchResponseData {
        query: args.fragment.clone(),
        snapshot_date,
        results,
    })?;
    Ok(CommandOutput::ok(data))
}
