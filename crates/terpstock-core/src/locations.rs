//! Store coordinates and great-circle distances.
//!
//! Coordinates come from a reference JSON file keyed by dispensary and then
//! by store location:
//!
//! ```json
//! { "muv": { "tampa-3": { "lat": 27.95, "lng": -82.46, "address": "..." } } }
//! ```
//!
//! Location keys are matched after lowercasing and turning spaces and
//! underscores into hyphens, so `Palm_Coast` finds `palm-coast`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{DispensaryId, ValidationError};

pub const EARTH_RADIUS_MILES: f64 = 3959.0;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("failed to read locations '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse locations '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(ValidationError::InvalidCoordinates {
                latitude: latitude.to_string(),
                longitude: longitude.to_string(),
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Haversine distance in statute miles.
    pub fn distance_miles(self, other: GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_MILES * c
    }
}

/// Distance rounded to hundredths of a mile, as reported to clients.
pub fn rounded_miles(from: GeoPoint, to: GeoPoint) -> f64 {
    (from.distance_miles(to) * 100.0).round() / 100.0
}

/// One entry of the reference file. Stores without coordinates are kept
/// so their address can still be listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreCoordinates {
    #[serde(default, rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, rename = "lng")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

impl StoreCoordinates {
    pub fn point(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint::new(latitude, longitude).ok(),
            _ => None,
        }
    }
}

pub fn normalize_location_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '_'], "-")
}

/// Reference coordinates for every known store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationBook {
    stores: BTreeMap<DispensaryId, BTreeMap<String, StoreCoordinates>>,
}

impl LocationBook {
    pub fn load(path: &Path) -> Result<Self, LocationError> {
        let content = std::fs::read_to_string(path).map_err(|source| LocationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let book = Self::from_json(&content).map_err(|source| LocationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), stores = book.len(), "loaded store locations");
        Ok(book)
    }

    /// Parses the reference document. Unknown dispensary keys are skipped.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, BTreeMap<String, StoreCoordinates>> = serde_json::from_str(content)?;
        let mut stores = BTreeMap::new();
        for (dispensary, locations) in raw {
            let Ok(id) = dispensary.parse::<DispensaryId>() else {
                warn!(dispensary = %dispensary, "skipping locations for unknown dispensary");
                continue;
            };
            let locations = locations
                .into_iter()
                .map(|(key, coordinates)| (normalize_location_key(&key), coordinates))
                .collect();
            stores.insert(id, locations);
        }
        Ok(Self { stores })
    }

    pub fn with_store(mut self, dispensary: DispensaryId, location: &str, coordinates: StoreCoordinates) -> Self {
        self.stores
            .entry(dispensary)
            .or_default()
            .insert(normalize_location_key(location), coordinates);
        self
    }

    /// Locations of one dispensary in key order.
    pub fn dispensary(&self, dispensary: DispensaryId) -> impl Iterator<Item = (&str, &StoreCoordinates)> {
        self.stores
            .get(&dispensary)
            .into_iter()
            .flat_map(|locations| locations.iter().map(|(key, coordinates)| (key.as_str(), coordinates)))
    }

    /// First of `candidates` (store id, then store name) with an entry.
    pub fn lookup<'a>(
        &self,
        dispensary: DispensaryId,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> Option<&StoreCoordinates> {
        let locations = self.stores.get(&dispensary)?;
        candidates
            .into_iter()
            .find_map(|candidate| locations.get(&normalize_location_key(candidate)))
    }

    pub fn len(&self) -> usize {
        self.stores.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
