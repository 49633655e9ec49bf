use terpstock_core::TerpstockConfig;

use crate::cli::CheckBatchArgs;
use crate::error::CliError;

use super::{build_service, CommandOutput};

pub async fn run(args: &CheckBatchArgs, config: &TerpstockConfig) -> Result<CommandOutput, CliError> {
    let service = build_service(config)?;
    service.warm_start().await?;

    let checks = service
        .query()
        .check_batches(&args.dispensary, &args.batch_ids)?;
    let data = match checks.as_slice() {
        [single] => serde_json::to_value(single)?,
        _ => serde_json::to_value(&checks)?,
    };
    Ok(CommandOutput::ok(data))
}
