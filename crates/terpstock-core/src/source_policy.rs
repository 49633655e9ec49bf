use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::{RetryPolicy, RetrySummary};
use crate::{DispensaryId, StoreRef};

/// One slice of a source's store list, for sources too slow to cover
/// every store in a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreBatch {
    /// Zero-based slice number.
    pub index: usize,
    pub stores_per_batch: usize,
}

impl StoreBatch {
    pub fn total_batches(&self, store_count: usize) -> usize {
        store_count.div_ceil(self.stores_per_batch.max(1))
    }

    /// Stores in this slice, in enumeration order. Empty past the last slice.
    pub fn select(&self, stores: Vec<StoreRef>) -> Vec<StoreRef> {
        let size = self.stores_per_batch.max(1);
        stores
            .into_iter()
            .skip(self.index.saturating_mul(size))
            .take(size)
            .collect()
    }
}

/// Fair-use and resilience limits for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePolicy {
    pub dispensary: DispensaryId,
    /// In-flight store requests allowed at once for this source.
    pub max_concurrency: usize,
    pub min_request_delay: Duration,
    pub max_request_delay: Duration,
    pub circuit: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    /// Budget for the whole source within a run.
    pub timeout: Duration,
    /// Restricts each run to one slice of the store list.
    pub store_batch: Option<StoreBatch>,
}

impl SourcePolicy {
    pub fn standard(dispensary: DispensaryId) -> Self {
        Self {
            dispensary,
            max_concurrency: 8,
            min_request_delay: Duration::from_millis(200),
            max_request_delay: Duration::from_millis(500),
            circuit: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(300),
            store_batch: None,
        }
    }

    /// Sweed POS rejects bursts above a handful of stores.
    pub fn muv_default() -> Self {
        Self {
            max_concurrency: 5,
            ..Self::standard(DispensaryId::Muv)
        }
    }

    /// The GraphQL endpoint pages per store and category, so requests are spaced wider.
    pub fn trulieve_default() -> Self {
        Self {
            max_concurrency: 4,
            min_request_delay: Duration::from_millis(300),
            max_request_delay: Duration::from_millis(800),
            ..Self::standard(DispensaryId::Trulieve)
        }
    }

    /// Headless HTML scraping is the slowest upstream.
    pub fn curaleaf_default() -> Self {
        Self {
            max_concurrency: 3,
            min_request_delay: Duration::from_millis(500),
            max_request_delay: Duration::from_millis(1_000),
            ..Self::standard(DispensaryId::Curaleaf)
        }
    }

    /// Sweed storefront pages are fetched one product at a time, two
    /// stores at once, with the storefronts' own pacing.
    pub fn storefront_default(dispensary: DispensaryId) -> Self {
        Self {
            max_concurrency: 2,
            min_request_delay: Duration::from_millis(1_500),
            max_request_delay: Duration::from_millis(2_000),
            timeout: Duration::from_secs(900),
            ..Self::standard(dispensary)
        }
    }

    pub fn default_for(dispensary: DispensaryId) -> Self {
        match dispensary {
            DispensaryId::Muv => Self::muv_default(),
            DispensaryId::Trulieve => Self::trulieve_default(),
            DispensaryId::Curaleaf => Self::curaleaf_default(),
            DispensaryId::GreenDragon | DispensaryId::Sanctuary => Self::storefront_default(dispensary),
            DispensaryId::Cookies | DispensaryId::Flowery => Self::standard(dispensary),
        }
    }

    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            dispensary: self.dispensary,
            max_concurrency: self.max_concurrency,
            min_request_delay_ms: self.min_request_delay.as_millis() as u64,
            max_request_delay_ms: self.max_request_delay.as_millis() as u64,
            failure_threshold: self.circuit.failure_threshold,
            timeout_secs: self.timeout.as_secs(),
            retry: RetrySummary::from(&self.retry),
            store_batch: self.store_batch,
        }
    }
}

/// Serializable view of a policy for CLI and HTTP output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub dispensary: DispensaryId,
    pub max_concurrency: usize,
    pub min_request_delay_ms: u64,
    pub max_request_delay_ms: u64,
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub retry: RetrySummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_batch: Option<StoreBatch>,
}
