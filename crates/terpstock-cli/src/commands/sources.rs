use std::sync::Arc;

use serde::Serialize;
use terpstock_core::data_source::StoreEnumeration;
use terpstock_core::extractor::MappingTable;
use terpstock_core::source_policy::PolicySummary;
use terpstock_core::{build_adapter, DispensaryId, ReqwestHttpClient, TerpstockConfig};

use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct SourceDescription {
    dispensary: DispensaryId,
    enabled: bool,
    enumeration: StoreEnumeration,
    categories: Vec<String>,
    /// Configured store override; `None` means the built-in list or discovery.
    configured_stores: Option<usize>,
    credentials_present: bool,
    policy: PolicySummary,
    mapping: MappingTable,
}

pub fn run(config: &TerpstockConfig) -> Result<CommandOutput, CliError> {
    let http_client = Arc::new(ReqwestHttpClient::new());
    let enabled = config.enabled_sources();

    let sources: Vec<SourceDescription> = DispensaryId::ALL
        .into_iter()
        .map(|id| {
            let source = config.source(id);
            let configured_stores = source.stores.as_ref().map(Vec::len);
            let adapter = build_adapter(id, http_client.clone(), source.stores, None);
            SourceDescription {
                dispensary: id,
                enabled: enabled.contains(&id),
                enumeration: adapter.enumeration(),
                categories: adapter.categories(),
                configured_stores,
                credentials_present: config.token(id).is_some(),
                policy: config.policy_for(id).summary(),
                mapping: config.mapping_for(id),
            }
        })
        .collect();

    Ok(CommandOutput::ok(serde_json::to_value(sources)?))
}
