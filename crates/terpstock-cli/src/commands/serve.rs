use serde_json::json;
use terpstock_core::{Scheduler, TerpstockConfig};
use tracing::info;

use crate::cli::ServeArgs;
use crate::error::CliError;

use super::{build_service, CommandOutput};

pub async fn run(args: &ServeArgs, mut config: TerpstockConfig) -> Result<CommandOutput, CliError> {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    let addr = config.bind_addr()?;
    let service = build_service(&config)?;
    service.warm_start().await?;

    let scheduler = (config.schedule.enabled && !args.no_schedule)
        .then(|| Scheduler::new(service.clone(), config.schedule.interval()).spawn());
    if scheduler.is_none() {
        info!("scheduled runs disabled");
    }

    let served = terpstock_web::serve(service, addr).await;
    if let Some(handle) = scheduler {
        handle.abort();
    }
    served?;

    Ok(CommandOutput::ok(json!({ "status": "stopped", "bind": addr.to_string() })))
}
