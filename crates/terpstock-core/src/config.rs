//! TOML configuration with environment overrides.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Secrets are never read from the file: source tokens come
//! from `TERPSTOCK_<SOURCE>_TOKEN` only.
//!
//! ```toml
//! [storage]
//! root = "/var/lib/terpstock"
//!
//! [orchestrator]
//! pool_size = 12
//! source_timeout_secs = 300
//!
//! [sources.trulieve]
//! max_concurrency = 4
//! stores = [{ id = "palm_coast", name = "Palm Coast" }]
//!
//! [sources.cookies.mapping]
//! batch_id = "attr:batch_name"
//! batch_id_fallback = "attr:sku"
//!
//! [sources.sanctuary]
//! store_batch = 2
//! stores_per_batch = 5
//!
//! [locations]
//! path = "/etc/terpstock/dispensary_locations.json"
//!
//! [genetics.confidence]
//! hybrid_of = "high"
//! ```

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::extractor::{FieldExpr, FieldMapping, MappingTable};
use crate::genetics::ConfidencePolicy;
use crate::logging::LogConfig;
use crate::retry::RetryPolicy;
use crate::source_policy::{SourcePolicy, StoreBatch};
use crate::{DispensaryId, StoreRef};

const MAX_POOL_SIZE: usize = 64;
const DEFAULT_STORES_PER_BATCH: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value '{field}': {reason}")]
    Invalid { field: String, reason: String },
    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A secret read from the environment; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Store requests in flight across all sources.
    pub pool_size: usize,
    pub source_timeout_secs: u64,
    pub write_raw_artifacts: bool,
    /// How far back start-up looks for a snapshot to warm the index.
    pub warm_start_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_size: crate::orchestrator::DEFAULT_POOL_SIZE,
            source_timeout_secs: 300,
            write_raw_artifacts: true,
            warm_start_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter,
        )
    }
}

/// Field-mapping overrides; unset expressions keep the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOverride {
    pub batch_id: Option<FieldExpr>,
    pub batch_id_fallback: Option<FieldExpr>,
    pub strain: Option<FieldExpr>,
    pub strain_fallback: Option<FieldExpr>,
}

impl MappingOverride {
    fn apply(&self, table: MappingTable) -> MappingTable {
        let batch_id = merge_mapping(&table.batch_id, &self.batch_id, &self.batch_id_fallback);
        let strain = merge_mapping(&table.strain, &self.strain, &self.strain_fallback);
        table.with_batch_id(batch_id).with_strain(strain)
    }
}

fn merge_mapping(
    base: &FieldMapping,
    primary: &Option<FieldExpr>,
    fallback: &Option<FieldExpr>,
) -> FieldMapping {
    FieldMapping::new(
        primary.clone().unwrap_or_else(|| base.primary.clone()),
        fallback.clone().or_else(|| base.fallback.clone()),
    )
}

/// Per-source overrides. Unset values fall back to the source's built-in policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub max_concurrency: Option<usize>,
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub stores: Option<Vec<StoreRef>>,
    /// Zero-based slice of the store list to fetch; unset fetches every store.
    pub store_batch: Option<usize>,
    pub stores_per_batch: Option<usize>,
    pub mapping: MappingOverride,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: None,
            min_delay_ms: None,
            max_delay_ms: None,
            failure_threshold: None,
            timeout_secs: None,
            stores: None,
            store_batch: None,
            stores_per_batch: None,
            mapping: MappingOverride::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 8 * 60,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:8080"),
        }
    }
}

/// Reference coordinates for dispensary locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    /// JSON file keyed by dispensary, then by store location.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticsConfig {
    pub enabled: bool,
    pub confidence: ConfidencePolicy,
}

impl Default for GeneticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence: ConfidencePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerpstockConfig {
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub sources: BTreeMap<DispensaryId, SourceConfig>,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
    pub genetics: GeneticsConfig,
    pub locations: LocationsConfig,
    pub logging: LogConfig,
    #[serde(skip)]
    tokens: BTreeMap<DispensaryId, Secret>,
}

impl TerpstockConfig {
    /// Loads `path` (defaults when `None`), applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(root) = lookup("TERPSTOCK_DATA_DIR").filter(|value| !value.trim().is_empty()) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(bind) = lookup("TERPSTOCK_BIND").filter(|value| !value.trim().is_empty()) {
            self.server.bind = bind;
        }
        for id in DispensaryId::ALL {
            let key = format!("TERPSTOCK_{}_TOKEN", id.as_str().to_ascii_uppercase());
            if let Some(token) = lookup(&key).filter(|value| !value.trim().is_empty()) {
                self.tokens.insert(id, Secret(token.trim().to_owned()));
            }
        }
        self.logging = self.logging.with_overrides(&lookup)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = self.orchestrator.pool_size;
        if pool == 0 || pool > MAX_POOL_SIZE {
            return Err(ConfigError::invalid(
                "orchestrator.pool_size",
                format!("must be in 1..={MAX_POOL_SIZE}, got {pool}"),
            ));
        }
        if self.orchestrator.source_timeout_secs == 0 {
            return Err(ConfigError::invalid("orchestrator.source_timeout_secs", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.schedule.interval_minutes == 0 {
            return Err(ConfigError::invalid("schedule.interval_minutes", "must be > 0"));
        }
        self.bind_addr()?;

        for (id, source) in &self.sources {
            if source.max_concurrency == Some(0) {
                return Err(ConfigError::invalid(
                    format!("sources.{id}.max_concurrency"),
                    "must be > 0",
                ));
            }
            let policy = self.policy_for(*id);
            if policy.min_request_delay > policy.max_request_delay {
                return Err(ConfigError::invalid(
                    format!("sources.{id}.min_delay_ms"),
                    "must not exceed max_delay_ms",
                ));
            }
            if source.timeout_secs == Some(0) {
                return Err(ConfigError::invalid(format!("sources.{id}.timeout_secs"), "must be > 0"));
            }
            if source.stores_per_batch == Some(0) {
                return Err(ConfigError::invalid(
                    format!("sources.{id}.stores_per_batch"),
                    "must be > 0",
                ));
            }
            if source.stores.as_ref().is_some_and(Vec::is_empty) {
                return Err(ConfigError::invalid(
                    format!("sources.{id}.stores"),
                    "must list at least one store when set",
                ));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::invalid("server.bind", format!("'{}' is not host:port", self.server.bind)))
    }

    pub fn source(&self, id: DispensaryId) -> SourceConfig {
        self.sources.get(&id).cloned().unwrap_or_default()
    }

    pub fn enabled_sources(&self) -> Vec<DispensaryId> {
        DispensaryId::ALL
            .into_iter()
            .filter(|id| self.source(*id).enabled)
            .collect()
    }

    /// Built-in policy for `id` with this configuration's overrides applied.
    pub fn policy_for(&self, id: DispensaryId) -> SourcePolicy {
        let source = self.source(id);
        let base = SourcePolicy::default_for(id);
        SourcePolicy {
            max_concurrency: source.max_concurrency.unwrap_or(base.max_concurrency),
            min_request_delay: source
                .min_delay_ms
                .map_or(base.min_request_delay, Duration::from_millis),
            max_request_delay: source
                .max_delay_ms
                .map_or(base.max_request_delay, Duration::from_millis),
            circuit: CircuitBreakerConfig {
                failure_threshold: source
                    .failure_threshold
                    .unwrap_or(base.circuit.failure_threshold),
            },
            retry: self.retry.policy(),
            // Sources with a longer built-in budget keep it.
            timeout: source.timeout_secs.map_or_else(
                || base.timeout.max(Duration::from_secs(self.orchestrator.source_timeout_secs)),
                Duration::from_secs,
            ),
            store_batch: source.store_batch.map(|index| StoreBatch {
                index,
                stores_per_batch: source.stores_per_batch.unwrap_or(DEFAULT_STORES_PER_BATCH),
            }),
            ..base
        }
    }

    pub fn mapping_for(&self, id: DispensaryId) -> MappingTable {
        self.source(id).mapping.apply(MappingTable::default_for(id))
    }

    pub fn token(&self, id: DispensaryId) -> Option<&Secret> {
        self.tokens.get(&id)
    }
}
