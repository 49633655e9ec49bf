use serde_json::json;
use terpstock_core::TerpstockConfig;

use crate::cli::GeneticsArgs;
use crate::error::CliError;

use super::{build_service, CommandOutput};

pub async fn run(args: &GeneticsArgs, config: &TerpstockConfig) -> Result<CommandOutput, CliError> {
    let service = build_service(config)?;
    let merger = service
        .genetics()
        .ok_or_else(|| CliError::Command(String::from("genetics is disabled in config")))?;

    let record = merger
        .lookup(&args.strain)
        .await
        .map_err(|error| CliError::Command(error.to_string()))?;
    let data = match record {
        Some(record) => json!({ "strain": args.strain, "found": true, "record": record }),
        None => json!({ "strain": args.strain, "found": false }),
    };
    Ok(CommandOutput::ok(data))
}
