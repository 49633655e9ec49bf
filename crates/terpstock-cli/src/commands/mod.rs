mod check_batch;
mod genetics;
mod run;
mod search;
mod serve;
mod sources;

use std::sync::Arc;

use serde_json::Value;
use terpstock_core::{FsObjectStore, IngestionService, ReqwestHttpClient, TerpstockConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// JSON printed to stdout plus the process exit code.
pub struct CommandOutput {
    pub data: Value,
    pub exit_code: u8,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self { data, exit_code: 0 }
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub async fn run(cli: &Cli, config: TerpstockConfig) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Serve(args) => serve::run(args, config).await,
        Command::Run(args) => run::run(args, &config).await,
        Command::Search(args) => search::run(args, &config).await,
        Command::CheckBatch(args) => check_batch::run(args, &config).await,
        Command::Genetics(args) => genetics::run(args, &config).await,
        Command::Sources => sources::run(&config),
    }
}

/// Service over the configured data directory and the real HTTP transport.
fn build_service(config: &TerpstockConfig) -> Result<Arc<IngestionService>, CliError> {
    let http_client = Arc::new(ReqwestHttpClient::new());
    let store = Arc::new(FsObjectStore::new(config.storage.root.clone()));
    let service = IngestionService::from_config(config, http_client, store)?;
    Ok(Arc::new(service))
}
