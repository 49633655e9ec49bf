//! # Domain Models
//!
//! Canonical domain types shared by every stage of the ingestion pipeline.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Product`] | Raw listing produced by a source adapter |
//! | [`StoreRef`] | Upstream store an adapter fetches |
//! | [`NormalizedBatchRecord`] | Batch/strain fact derived from a product |
//! | [`MergeKey`] | `(dispensary, store, batch)` snapshot identity |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`SnapshotDate`] | Calendar day keying a snapshot (`yyyyMMdd`) |

mod batch;
mod product;
pub mod strain;
mod timestamp;

pub use batch::{MergeKey, NormalizedBatchRecord};
pub use product::{Potency, Product, StoreRef};
pub use strain::{normalize_strain_key, strain_slug};
pub use timestamp::{SnapshotDate, UtcDateTime};
