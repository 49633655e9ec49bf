//! Strain lineage extraction and the confidence-ranked partition merge.
//!
//! | Step | Type |
//! |------|------|
//! | Match lineage phrasing in a product description | [`LineageExtractor`] |
//! | Assign confidence by extraction method | [`ConfidencePolicy`] |
//! | Upsert into `genetics/partitions/{key}.json` | [`GeneticsPartitionMerger`] |
//!
//! A `Medium` record never replaces a `High` one for the same strain.

mod extract;
mod partition;

use thiserror::Error;

use crate::object_store::StoreError;

pub use extract::{Confidence, ConfidencePolicy, ExtractionMethod, Lineage, LineageExtractor};
pub use partition::{
    partition_key, GeneticsIndex, GeneticsIndexEntry, GeneticsMergeOutcome, GeneticsPartition,
    GeneticsPartitionMerger, GeneticsRecord,
};

#[derive(Debug, Error)]
pub enum GeneticsError {
    #[error("lineage pattern '{method}' failed to compile: {source}")]
    Pattern {
        method: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("genetics object '{path}' is not valid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode genetics object: {0}")]
    Encode(#[source] serde_json::Error),
}
