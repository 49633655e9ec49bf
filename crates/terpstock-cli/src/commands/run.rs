use terpstock_core::{PipelineError, RunTrigger, TerpstockConfig};

use crate::cli::RunArgs;
use crate::error::CliError;

use super::{build_service, CommandOutput};

/// Exit code for a run where no source produced data.
const SYSTEMIC_FAILURE_EXIT: u8 = 3;

pub async fn run(args: &RunArgs, config: &TerpstockConfig) -> Result<CommandOutput, CliError> {
    if let Some(disabled) = args
        .sources
        .iter()
        .find(|id| !config.enabled_sources().contains(id))
    {
        return Err(CliError::Command(format!("source '{disabled}' is disabled in config")));
    }

    let service = build_service(config)?;
    service.warm_start().await?;
    let only = (!args.sources.is_empty()).then_some(args.sources.as_slice());

    match service.run_once(RunTrigger::OnDemand, only).await {
        Ok(report) => Ok(CommandOutput::ok(serde_json::to_value(report)?)),
        // The summary is still printed so operators can see every source's failure.
        Err(PipelineError::SystemicFailure { report, .. }) => {
            Ok(CommandOutput::ok(serde_json::to_value(*report)?).with_exit_code(SYSTEMIC_FAILURE_EXIT))
        }
        Err(error) => Err(error.into()),
    }
}
