//! Uniform resilience wrapper around every adapter call.
//!
//! A [`SourceGuard`] lives for one source within one run and composes the
//! per-source throttle, the bounded retry policy and the run-scoped circuit
//! breaker.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState, TripReason};
use crate::data_source::{SourceAdapter, SourceError, SourceErrorKind, StoreFetch};
use crate::retry::RetryPolicy;
use crate::source_policy::SourcePolicy;
use crate::throttling::SourceThrottle;
use crate::StoreRef;

/// Outcome of one guarded store request.
#[derive(Debug)]
pub enum GuardedFetch {
    Fetched(StoreFetch),
    Failed(SourceError),
    /// The circuit was already open; no upstream call was made.
    SkippedCircuitOpen,
}

pub struct SourceGuard {
    throttle: SourceThrottle,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl SourceGuard {
    pub fn new(policy: &SourcePolicy) -> Self {
        Self {
            throttle: SourceThrottle::from_policy(policy),
            breaker: Arc::new(CircuitBreaker::new(policy.circuit)),
            retry: policy.retry,
        }
    }

    pub async fn fetch(&self, adapter: &dyn SourceAdapter, store: &StoreRef) -> GuardedFetch {
        if !self.breaker.allow_request() {
            return GuardedFetch::SkippedCircuitOpen;
        }

        let _permit = match self.throttle.acquire().await {
            Ok(permit) => permit,
            Err(error) => return GuardedFetch::Failed(error),
        };

        // Sibling stores may have opened the circuit while this one waited.
        if !self.breaker.allow_request() {
            return GuardedFetch::SkippedCircuitOpen;
        }

        let source = adapter.id();
        let result = self
            .retry
            .run(|attempt| {
                debug!(%source, store = %store.id, attempt = attempt + 1, "fetching store menu");
                adapter.fetch(store)
            })
            .await;

        match result {
            Ok(fetch) => {
                self.breaker.record_success();
                GuardedFetch::Fetched(fetch)
            }
            Err(error) => {
                if error.kind() == SourceErrorKind::Blocked {
                    self.breaker.trip();
                } else {
                    self.breaker.record_failure();
                }
                if self.breaker.state() == CircuitState::Open {
                    warn!(
                        %source,
                        store = %store.id,
                        reason = ?self.breaker.trip_reason(),
                        streak = self.breaker.consecutive_failures(),
                        "circuit opened; remaining stores skipped for this run"
                    );
                } else {
                    debug!(
                        %source,
                        store = %store.id,
                        streak = self.breaker.consecutive_failures(),
                        "store fetch failed"
                    );
                }
                GuardedFetch::Failed(error)
            }
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        self.breaker.trip_reason()
    }
}
