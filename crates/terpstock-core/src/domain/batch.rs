use serde::{Deserialize, Serialize};

use crate::{DispensaryId, UtcDateTime};

/// Batch/strain fact derived from one `Product`.
///
/// `batch_id` and `strain_name` are optional: an unmappable field yields a
/// record with a null value rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBatchRecord {
    pub dispensary: DispensaryId,
    pub store_id: String,
    pub store_name: Option<String>,
    pub batch_id: Option<String>,
    pub strain_name: Option<String>,
    pub product_name: String,
    pub category: Option<String>,
    pub region: Option<String>,
    pub last_seen: UtcDateTime,
}

impl NormalizedBatchRecord {
    /// Snapshot merge key; records without a batch id have none.
    pub fn merge_key(&self) -> Option<MergeKey> {
        self.batch_id.as_ref().map(|batch_id| MergeKey {
            dispensary: self.dispensary,
            store_id: self.store_id.clone(),
            batch_id: batch_id.clone(),
        })
    }

    pub fn store_label(&self) -> &str {
        self.store_name.as_deref().unwrap_or(&self.store_id)
    }
}

/// Identity of a record within a consolidated snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MergeKey {
    pub dispensary: DispensaryId,
    pub store_id: String,
    pub batch_id: String,
}
