//! Source adapter trait and fetch types.
//!
//! Every upstream dispensary menu (REST, GraphQL or HTML) is wrapped by one
//! [`SourceAdapter`]. The orchestrator only sees this contract; protocol
//! details stay inside the adapter.
//!
//! # Contract
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`id`](SourceAdapter::id) | Dispensary identifier |
//! | [`categories`](SourceAdapter::categories) | Menu categories the adapter queries |
//! | [`stores`](SourceAdapter::stores) | Store enumeration (static list or discovery call) |
//! | [`fetch`](SourceAdapter::fetch) | Products for one store, skipping malformed records |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::http_client::{HttpError, HttpResponse, StatusClass};
use crate::{DispensaryId, Product, StoreRef};

/// Boxed future returned by adapter methods.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// How an adapter finds its stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreEnumeration {
    StaticList,
    Discovery,
}

/// Products returned for one store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreFetch {
    pub products: Vec<Product>,
    /// Upstream records dropped because they did not match the expected shape.
    pub skipped: usize,
}

impl StoreFetch {
    pub fn new(products: Vec<Product>, skipped: usize) -> Self {
        Self { products, skipped }
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// Connection reset, timeout, 5xx or 429; retried with backoff.
    TransientNetwork,
    /// Response envelope did not match the expected schema.
    SchemaShape,
    /// Credentials rejected or client blocked; opens the circuit.
    Blocked,
    /// Circuit open or source timed out; no upstream call was made.
    Unavailable,
    Internal,
}

/// Error taxonomy reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorTaxonomy {
    TransientNetworkError,
    SchemaShapeError,
    SourceUnavailableError,
    SystemicFailure,
}

/// Structured source error used by the retry policy and run result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::TransientNetwork,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn schema_shape(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::SchemaShape,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Blocked,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a transport failure, keeping its retry hint.
    pub fn from_transport(source: DispensaryId, error: &HttpError) -> Self {
        let message = format!("{source} transport error: {}", error.message());
        if error.retryable() {
            Self::transient(message)
        } else {
            Self::internal(message)
        }
    }

    /// Maps a non-2xx response onto the taxonomy.
    pub fn from_status(source: DispensaryId, response: &HttpResponse) -> Self {
        let message = format!("{source} upstream returned status {}", response.status);
        match response.class() {
            StatusClass::Blocked => Self::blocked(message),
            StatusClass::Retryable => Self::transient(message),
            StatusClass::Success | StatusClass::Unexpected => Self::schema_shape(message),
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn taxonomy(&self) -> ErrorTaxonomy {
        match self.kind {
            SourceErrorKind::TransientNetwork | SourceErrorKind::Internal => {
                ErrorTaxonomy::TransientNetworkError
            }
            SourceErrorKind::SchemaShape => ErrorTaxonomy::SchemaShapeError,
            SourceErrorKind::Blocked | SourceErrorKind::Unavailable => {
                ErrorTaxonomy::SourceUnavailableError
            }
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::TransientNetwork => "source.transient_network",
            SourceErrorKind::SchemaShape => "source.schema_shape",
            SourceErrorKind::Blocked => "source.blocked",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; the orchestrator shares one
/// adapter across all concurrent store fetches of a run.
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> DispensaryId;

    fn enumeration(&self) -> StoreEnumeration;

    fn categories(&self) -> Vec<String>;

    /// Stores to fetch this run.
    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>>;

    /// Products for one store. Malformed records are skipped and counted,
    /// never returned as an error.
    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        let blocked = SourceError::from_status(DispensaryId::Flowery, &HttpResponse::with_status(401, ""));
        assert_eq!(blocked.kind(), SourceErrorKind::Blocked);
        assert_eq!(blocked.taxonomy(), ErrorTaxonomy::SourceUnavailableError);
        assert!(!blocked.retryable());

        let throttled = SourceError::from_status(DispensaryId::Muv, &HttpResponse::with_status(429, ""));
        assert_eq!(throttled.kind(), SourceErrorKind::TransientNetwork);
        assert!(throttled.retryable());

        let missing = SourceError::from_status(DispensaryId::Cookies, &HttpResponse::with_status(404, ""));
        assert_eq!(missing.taxonomy(), ErrorTaxonomy::SchemaShapeError);
    }

    #[test]
    fn display_includes_stable_code() {
        let error = SourceError::schema_shape("missing products array");
        assert_eq!(error.to_string(), "missing products array (source.schema_shape)");
    }
}
