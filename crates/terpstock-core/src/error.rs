use thiserror::Error;

/// Validation and contract errors exposed by `terpstock-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid dispensary '{value}', expected one of muv, trulieve, cookies, flowery, curaleaf, green_dragon, sanctuary")]
    InvalidDispensary { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("snapshot date must be yyyyMMdd: '{value}'")]
    InvalidSnapshotDate { value: String },

    #[error("invalid field mapping expression '{value}'")]
    InvalidFieldExpr { value: String },

    #[error("invalid run trigger '{value}', expected scheduled or on_demand")]
    InvalidTrigger { value: String },

    #[error("invalid confidence '{value}', expected high or medium")]
    InvalidConfidence { value: String },

    #[error("store id cannot be empty")]
    EmptyStoreId,

    #[error("search fragment cannot be empty")]
    EmptySearchFragment,

    #[error("batch id cannot be empty")]
    EmptyBatchId,

    #[error("coordinates out of range: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: String, longitude: String },

    #[error("{field} must be greater than 0 and at most {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        max: String,
    },
}
