//! Strain search, batch presence and store distance queries over the
//! current index.
//!
//! "Not found" is an expected answer here: batch ids belong to production
//! runs and drop out of inventory, so [`StockQueryService::check_batch`]
//! returns a negative result with a suggestion instead of an error.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::index::{IndexHandle, IndexMetadata};
use crate::locations::{rounded_miles, GeoPoint, LocationBook};
use crate::{normalize_strain_key, DispensaryId, NormalizedBatchRecord, UtcDateTime, ValidationError};

pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const DEFAULT_NEAREST_MILES: f64 = 50.0;
pub const MAX_NEAREST_MILES: f64 = 100.0;
pub const DEFAULT_NEAREST_LIMIT: usize = 10;
pub const MAX_NEAREST_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix,
    Substring,
}

impl MatchKind {
    fn classify(fragment: &str, key: &str) -> Option<Self> {
        if key == fragment {
            Some(Self::Exact)
        } else if key.starts_with(fragment) {
            Some(Self::Prefix)
        } else if key.contains(fragment) {
            Some(Self::Substring)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub fragment: String,
    #[serde(default)]
    pub dispensary: Option<DispensaryId>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            ..Self::default()
        }
    }

    pub fn with_dispensary(mut self, dispensary: Option<DispensaryId>) -> Self {
        self.dispensary = dispensary;
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn accepts(&self, record: &NormalizedBatchRecord) -> bool {
        let dispensary_ok = self
            .dispensary
            .map_or(true, |dispensary| record.dispensary == dispensary);
        let category_ok = self.category.as_deref().map_or(true, |wanted| {
            record
                .category
                .as_deref()
                .is_some_and(|category| category.eq_ignore_ascii_case(wanted.trim()))
        });
        dispensary_ok && category_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub strain: String,
    pub dispensary: DispensaryId,
    pub store_id: String,
    pub store_name: Option<String>,
    pub batch_id: Option<String>,
    pub category: Option<String>,
    pub last_seen: UtcDateTime,
    pub match_kind: MatchKind,
}

impl SearchHit {
    fn from_record(record: &NormalizedBatchRecord, match_kind: MatchKind) -> Self {
        Self {
            strain: record.strain_name.clone().unwrap_or_default(),
            dispensary: record.dispensary,
            store_id: record.store_id.clone(),
            store_name: record.store_name.clone(),
            batch_id: record.batch_id.clone(),
            category: record.category.clone(),
            last_seen: record.last_seen,
            match_kind,
        }
    }

    fn store_label(&self) -> &str {
        self.store_name.as_deref().unwrap_or(&self.store_id)
    }

    /// Match kind, then dispensary, store name and batch id, ascending.
    fn rank(&self, other: &Self) -> Ordering {
        self.match_kind
            .cmp(&other.match_kind)
            .then(self.dispensary.cmp(&other.dispensary))
            .then_with(|| self.store_label().cmp(other.store_label()))
            .then_with(|| self.batch_id.cmp(&other.batch_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLocation {
    pub store_id: String,
    pub store_name: Option<String>,
    pub strain: Option<String>,
    pub product_name: String,
    pub last_seen: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheck {
    pub dispensary: String,
    pub batch_id: String,
    pub in_stock: bool,
    pub stores: Vec<BatchLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A reference store location, with its distance from the caller when
/// an origin was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreLocation {
    pub location_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub distance_miles: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyBatch {
    pub dispensary: DispensaryId,
    pub store_id: String,
    pub store_name: Option<String>,
    pub batch_id: Option<String>,
    pub product_name: String,
    pub category: Option<String>,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_miles: f64,
    pub last_seen: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestStock {
    pub strain: String,
    pub strain_normalized: String,
    pub origin: GeoPoint,
    pub max_distance_miles: f64,
    /// Matches inside the radius before `limit` was applied.
    pub total_within_radius: usize,
    pub locations: Vec<NearbyBatch>,
}

#[derive(Debug, Clone)]
pub struct StockQueryService {
    index: IndexHandle,
    locations: Arc<LocationBook>,
}

impl StockQueryService {
    pub fn new(index: IndexHandle) -> Self {
        Self {
            index,
            locations: Arc::default(),
        }
    }

    pub fn with_locations(mut self, locations: Arc<LocationBook>) -> Self {
        self.locations = locations;
        self
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ValidationError> {
        let fragment = normalize_strain_key(&query.fragment);
        if fragment.is_empty() {
            return Err(ValidationError::EmptySearchFragment);
        }

        let index = self.index.current();
        let mut hits: Vec<SearchHit> = index
            .strains()
            .filter_map(|(key, records)| {
                MatchKind::classify(&fragment, key).map(|kind| (kind, records))
            })
            .flat_map(move |(kind, records)| {
                records
                    .into_iter()
                    .filter(move |record| query.accepts(record))
                    .map(move |record| SearchHit::from_record(record, kind))
            })
            .collect();

        hits.sort_by(SearchHit::rank);
        hits.truncate(query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        Ok(hits)
    }

    /// Presence of one batch. Unknown dispensaries and unknown batch ids
    /// both yield `in_stock: false` with a suggestion.
    pub fn check_batch(&self, dispensary: &str, batch_id: &str) -> Result<BatchCheck, ValidationError> {
        let batch_id = batch_id.trim();
        if batch_id.is_empty() {
            return Err(ValidationError::EmptyBatchId);
        }

        let stores: Vec<BatchLocation> = match dispensary.parse::<DispensaryId>() {
            Ok(id) => self
                .index
                .current()
                .batch(id, batch_id)
                .into_iter()
                .map(|record| BatchLocation {
                    store_id: record.store_id.clone(),
                    store_name: record.store_name.clone(),
                    strain: record.strain_name.clone(),
                    product_name: record.product_name.clone(),
                    last_seen: record.last_seen,
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        let in_stock = !stores.is_empty();
        let suggestion = (!in_stock).then(|| {
            format!(
                "batch '{batch_id}' is not in current {dispensary} inventory; batch ids rotate \
                 with production runs, so search by strain name instead"
            )
        });
        Ok(BatchCheck {
            dispensary: dispensary.trim().to_lowercase(),
            batch_id: batch_id.to_owned(),
            in_stock,
            stores,
            suggestion,
        })
    }

    pub fn check_batches(
        &self,
        dispensary: &str,
        batch_ids: &[String],
    ) -> Result<Vec<BatchCheck>, ValidationError> {
        batch_ids
            .iter()
            .map(|batch_id| self.check_batch(dispensary, batch_id))
            .collect()
    }

    pub fn list_dispensary(&self, dispensary: DispensaryId) -> Vec<NormalizedBatchRecord> {
        self.index.current().dispensary(dispensary).cloned().collect()
    }

    pub fn status(&self) -> IndexMetadata {
        self.index.current().metadata().clone()
    }

    /// Reference locations of one dispensary. With an origin they are
    /// ordered nearest first, stores without coordinates last.
    pub fn store_locations(&self, dispensary: DispensaryId, origin: Option<GeoPoint>) -> Vec<StoreLocation> {
        let mut locations: Vec<StoreLocation> = self
            .locations
            .dispensary(dispensary)
            .map(|(key, coordinates)| StoreLocation {
                location_id: key.to_owned(),
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
                address: coordinates.address.clone(),
                distance_miles: origin
                    .zip(coordinates.point())
                    .map(|(origin, point)| rounded_miles(origin, point)),
            })
            .collect();

        if origin.is_some() {
            locations.sort_by(|left, right| {
                let left = left.distance_miles.unwrap_or(f64::INFINITY);
                let right = right.distance_miles.unwrap_or(f64::INFINITY);
                left.total_cmp(&right)
            });
        }
        locations
    }

    /// Stores carrying `strain` (exact normalized match) within
    /// `max_distance` miles of `origin`, nearest first. Records whose store
    /// has no reference coordinates are left out.
    pub fn nearest(
        &self,
        strain: &str,
        origin: GeoPoint,
        max_distance: Option<f64>,
        limit: Option<usize>,
    ) -> Result<NearestStock, ValidationError> {
        let key = normalize_strain_key(strain);
        if key.is_empty() {
            return Err(ValidationError::EmptySearchFragment);
        }
        let max_distance = max_distance.unwrap_or(DEFAULT_NEAREST_MILES);
        if !(max_distance > 0.0 && max_distance <= MAX_NEAREST_MILES) {
            return Err(ValidationError::OutOfRange {
                field: "max_distance",
                value: max_distance.to_string(),
                max: MAX_NEAREST_MILES.to_string(),
            });
        }
        let limit = limit.unwrap_or(DEFAULT_NEAREST_LIMIT);
        if limit == 0 || limit > MAX_NEAREST_LIMIT {
            return Err(ValidationError::OutOfRange {
                field: "limit",
                value: limit.to_string(),
                max: MAX_NEAREST_LIMIT.to_string(),
            });
        }

        let index = self.index.current();
        let mut nearby: Vec<NearbyBatch> = index
            .strain(&key)
            .into_iter()
            .filter_map(|record| {
                let candidates = std::iter::once(record.store_id.as_str()).chain(record.store_name.as_deref());
                let coordinates = self.locations.lookup(record.dispensary, candidates)?;
                let point = coordinates.point()?;
                let distance_miles = rounded_miles(origin, point);
                (distance_miles <= max_distance).then(|| NearbyBatch {
                    dispensary: record.dispensary,
                    store_id: record.store_id.clone(),
                    store_name: record.store_name.clone(),
                    batch_id: record.batch_id.clone(),
                    product_name: record.product_name.clone(),
                    category: record.category.clone(),
                    address: coordinates.address.clone(),
                    latitude: point.latitude,
                    longitude: point.longitude,
                    distance_miles,
                    last_seen: record.last_seen,
                })
            })
            .collect();

        nearby.sort_by(|left, right| {
            left.distance_miles
                .total_cmp(&right.distance_miles)
                .then(left.dispensary.cmp(&right.dispensary))
                .then_with(|| left.store_id.cmp(&right.store_id))
        });
        let total_within_radius = nearby.len();
        nearby.truncate(limit);

        Ok(NearestStock {
            strain: strain.trim().to_owned(),
            strain_normalized: key,
            origin,
            max_distance_miles: max_distance,
            total_within_radius,
            locations: nearby,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StrainIndex;
    use crate::locations::StoreCoordinates;
    use crate::snapshot::{ConsolidatedSnapshot, RunMarker, SourceMerge};
    use crate::SnapshotDate;

    fn record(dispensary: DispensaryId, store: &str, batch: &str, strain: &str) -> NormalizedBatchRecord {
        NormalizedBatchRecord {
            dispensary,
            store_id: store.to_owned(),
            store_name: None,
            batch_id: Some(batch.to_owned()),
            strain_name: Some(strain.to_owned()),
            product_name: format!("{strain} 3.5g"),
            category: Some(String::from("Flower")),
            region: None,
            last_seen: UtcDateTime::parse("2026-02-01T10:00:00Z").expect("valid timestamp"),
        }
    }

    fn service(records: Vec<NormalizedBatchRecord>) -> StockQueryService {
        let mut snapshot = ConsolidatedSnapshot::new(SnapshotDate::from_ymd(2026, 2, 1).expect("date"));
        for record in records {
            snapshot.merge_source(&SourceMerge {
                dispensary: record.dispensary,
                records: vec![record],
                marker: RunMarker {
                    run_id: uuid::Uuid::new_v4(),
                    finished_at: UtcDateTime::now(),
                    record_count: 1,
                },
            });
        }
        StockQueryService::new(IndexHandle::new(StrainIndex::build(&snapshot)))
    }

    #[test]
    fn ranks_exact_then_prefix_then_substring() {
        let service = service(vec![
            record(DispensaryId::Muv, "298", "M1", "Frozen Gelato"),
            record(DispensaryId::Muv, "298", "M2", "Gelato 41"),
            record(DispensaryId::Trulieve, "palm_coast", "T1", "Gelato"),
            record(DispensaryId::Cookies, "miami", "C1", "Sour Diesel"),
        ]);

        let hits = service.search(&SearchQuery::new("gelato")).expect("search succeeds");
        let kinds: Vec<_> = hits.iter().map(|hit| (hit.match_kind, hit.strain.as_str())).collect();

        assert_eq!(
            kinds,
            vec![
                (MatchKind::Exact, "Gelato"),
                (MatchKind::Prefix, "Gelato 41"),
                (MatchKind::Substring, "Frozen Gelato"),
            ]
        );
    }

    #[test]
    fn filters_and_limits_results() {
        let service = service(vec![
            record(DispensaryId::Muv, "298", "M1", "Gelato"),
            record(DispensaryId::Muv, "299", "M2", "Gelato"),
            record(DispensaryId::Trulieve, "palm_coast", "T1", "Gelato"),
        ]);

        let query = SearchQuery::new("Gelato")
            .with_dispensary(Some(DispensaryId::Muv))
            .with_limit(Some(1));
        let hits = service.search(&query).expect("search succeeds");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].store_id, "298");

        let vapes = SearchQuery::new("gelato").with_category(Some(String::from("vapes")));
        assert!(service.search(&vapes).expect("search succeeds").is_empty());
    }

    #[test]
    fn blank_fragment_is_rejected() {
        let service = service(Vec::new());
        let error = service.search(&SearchQuery::new(" - ")).expect_err("blank fragment");
        assert_eq!(error, ValidationError::EmptySearchFragment);
    }

    #[test]
    fn batch_lookup_is_case_insensitive_and_lists_stores() {
        let service = service(vec![
            record(DispensaryId::Trulieve, "palm_coast", "TRU-100_B1", "Gelato"),
            record(DispensaryId::Trulieve, "miami_north", "TRU-100_B1", "Gelato"),
        ]);

        let check = service
            .check_batch("Trulieve", "tru-100_b1")
            .expect("lookup succeeds");

        assert!(check.in_stock);
        assert_eq!(check.stores.len(), 2);
        assert_eq!(check.suggestion, None);
    }

    fn with_tampa_bay_locations(service: StockQueryService) -> StockQueryService {
        let at = |latitude, longitude, address: &str| StoreCoordinates {
            latitude: Some(latitude),
            longitude: Some(longitude),
            address: Some(address.to_owned()),
        };
        let book = LocationBook::default()
            .with_store(DispensaryId::Muv, "tampa-3", at(27.95, -82.45, "Tampa"))
            .with_store(DispensaryId::Muv, "orlando", at(28.5384, -81.3789, "Orlando"))
            .with_store(DispensaryId::Trulieve, "brandon", at(27.98, -82.33, "Brandon"))
            .with_store(
                DispensaryId::Trulieve,
                "pending",
                StoreCoordinates {
                    latitude: None,
                    longitude: None,
                    address: None,
                },
            );
        service.with_locations(Arc::new(book))
    }

    #[test]
    fn nearest_keeps_stores_inside_the_radius_nearest_first() {
        let service = with_tampa_bay_locations(service(vec![
            record(DispensaryId::Muv, "orlando", "M2", "Gelato"),
            record(DispensaryId::Trulieve, "brandon", "T1", "Gelato"),
            record(DispensaryId::Muv, "tampa_3", "M1", "Gelato"),
            record(DispensaryId::Cookies, "miami", "C1", "Gelato"),
            record(DispensaryId::Muv, "tampa-3", "M9", "Gelato 41"),
        ]));
        let downtown = GeoPoint::new(27.9506, -82.4572).expect("valid point");

        let nearest = service
            .nearest("gelato", downtown, Some(20.0), None)
            .expect("query is valid");

        let stores: Vec<&str> = nearest.locations.iter().map(|hit| hit.store_id.as_str()).collect();
        assert_eq!(stores, vec!["tampa_3", "brandon"]);
        assert_eq!(nearest.total_within_radius, 2);
        assert_eq!(nearest.locations[0].address.as_deref(), Some("Tampa"));
        assert!(nearest.locations[1].distance_miles > 5.0);
    }

    #[test]
    fn nearest_applies_the_limit_after_counting() {
        let service = with_tampa_bay_locations(service(vec![
            record(DispensaryId::Muv, "orlando", "M2", "Gelato"),
            record(DispensaryId::Trulieve, "brandon", "T1", "Gelato"),
        ]));
        let downtown = GeoPoint::new(27.9506, -82.4572).expect("valid point");

        let nearest = service
            .nearest("Gelato", downtown, None, Some(1))
            .expect("query is valid");

        assert_eq!(nearest.max_distance_miles, DEFAULT_NEAREST_MILES);
        assert_eq!(nearest.total_within_radius, 1);
        assert_eq!(nearest.locations.len(), 1);
    }

    #[test]
    fn nearest_rejects_radius_and_limit_outside_their_caps() {
        let service = service(Vec::new());
        let origin = GeoPoint::new(27.95, -82.45).expect("valid point");

        let radius = service.nearest("gelato", origin, Some(150.0), None).expect_err("radius too wide");
        assert!(matches!(radius, ValidationError::OutOfRange { field: "max_distance", .. }));
        let limit = service.nearest("gelato", origin, None, Some(51)).expect_err("limit too high");
        assert!(matches!(limit, ValidationError::OutOfRange { field: "limit", .. }));
        assert!(service.nearest("gelato", origin, None, Some(0)).is_err());
    }

    #[test]
    fn store_locations_sort_by_distance_with_unknown_coordinates_last() {
        let service = with_tampa_bay_locations(service(Vec::new()));
        let downtown = GeoPoint::new(27.9506, -82.4572).expect("valid point");

        let sorted = service.store_locations(DispensaryId::Trulieve, Some(downtown));
        let ids: Vec<&str> = sorted.iter().map(|location| location.location_id.as_str()).collect();
        assert_eq!(ids, vec!["brandon", "pending"]);
        assert_eq!(sorted[1].distance_miles, None);

        let unsorted = service.store_locations(DispensaryId::Muv, None);
        assert!(unsorted.iter().all(|location| location.distance_miles.is_none()));
        assert!(service.store_locations(DispensaryId::Cookies, None).is_empty());
    }

    #[test]
    fn unknown_dispensary_is_a_negative_result_not_an_error() {
        let service = service(Vec::new());
        let check = service.check_batch("sunburn", "X-1").expect("lookup succeeds");

        assert!(!check.in_stock);
        assert!(check.suggestion.is_some());
    }
}
