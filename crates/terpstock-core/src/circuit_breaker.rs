//! Run-scoped circuit breaker.
//!
//! A breaker belongs to one source for one run. It never half-opens: once a
//! source trips, its remaining stores are skipped until the next run builds
//! a fresh breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Why a source's circuit opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    /// More than `failure_threshold` store fetches failed back to back.
    ConsecutiveFailures,
    /// The upstream rejected the client (401/403).
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive store failures tolerated before the source is cut off.
    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
        }
    }
}

/// Breaker shared by the concurrent store fetches of one source.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    streak: AtomicU32,
    tripped: OnceLock<TripReason>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold,
            streak: AtomicU32::new(0),
            tripped: OnceLock::new(),
        }
    }

    pub fn allow_request(&self) -> bool {
        self.tripped.get().is_none()
    }

    /// A successful store fetch breaks the failure streak.
    pub fn record_success(&self) {
        if self.allow_request() {
            self.streak.store(0, Ordering::SeqCst);
        }
    }

    pub fn record_failure(&self) {
        let streak = self.streak.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if streak > self.threshold {
            // First reason wins; a later Blocked does not relabel the trip.
            let _ = self.tripped.set(TripReason::ConsecutiveFailures);
        }
    }

    /// Opens the circuit without waiting for a streak.
    pub fn trip(&self) {
        let _ = self.tripped.set(TripReason::Blocked);
    }

    pub fn state(&self) -> CircuitState {
        match self.tripped.get() {
            Some(_) => CircuitState::Open,
            None => CircuitState::Closed,
        }
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        self.tripped.get().copied()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.streak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_cut_off_once_the_streak_exceeds_the_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
        });

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.trip_reason(), Some(TripReason::ConsecutiveFailures));
        assert!(!breaker.allow_request());
    }

    #[test]
    fn a_store_success_between_failures_restarts_the_streak() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        for _ in 0..5 {
            breaker.record_failure();
        }

        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(breaker.allow_request());
    }

    #[test]
    fn blocked_source_stays_open_for_the_rest_of_the_run() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        breaker.trip();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.trip_reason(), Some(TripReason::Blocked));
    }
}
