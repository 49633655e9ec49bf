//! Batch/lot extraction driven by declarative field mappings.
//!
//! Each source has a [`MappingTable`] with a primary and a fallback
//! [`FieldExpr`] for the batch id and for the strain name. Expressions are
//! plain strings so they can be overridden from configuration:
//!
//! | Expression | Reads |
//! |------------|-------|
//! | `batch_code` | `Product::batch_code` |
//! | `strain_name` | `Product::strain_name` |
//! | `name` | `Product::name` |
//! | `category` | `Product::category` |
//! | `brand` | `Product::brand` |
//! | `attr:<key>` | `Product::attributes[key]` |
//! | `name_before:<sep>` | product name up to the first `sep` |
//!
//! An expression that yields nothing never fails the record; the field is
//! left empty and counted in [`CompletenessStats`].

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DispensaryId, NormalizedBatchRecord, Product, StoreRef, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldExpr {
    BatchCode,
    StrainName,
    Name,
    Category,
    Brand,
    Attribute(String),
    NameBefore(String),
}

impl FieldExpr {
    pub fn evaluate(&self, product: &Product) -> Option<String> {
        let raw = match self {
            Self::BatchCode => product.batch_code.clone(),
            Self::StrainName => product.strain_name.clone(),
            Self::Name => Some(product.name.clone()),
            Self::Category => product.category.clone(),
            Self::Brand => product.brand.clone(),
            Self::Attribute(key) => product.attribute(key).map(str::to_owned),
            Self::NameBefore(separator) => product
                .name
                .split_once(separator.as_str())
                .map(|(head, _)| head.to_owned()),
        };
        raw.map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }
}

impl FromStr for FieldExpr {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFieldExpr {
            value: value.to_owned(),
        };

        if let Some(key) = value.strip_prefix("attr:") {
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Attribute(key.to_owned()));
        }
        if let Some(separator) = value.strip_prefix("name_before:") {
            // The separator is taken verbatim; surrounding spaces matter.
            if separator.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::NameBefore(separator.to_owned()));
        }

        match value.trim() {
            "batch_code" => Ok(Self::BatchCode),
            "strain_name" => Ok(Self::StrainName),
            "name" => Ok(Self::Name),
            "category" => Ok(Self::Category),
            "brand" => Ok(Self::Brand),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for FieldExpr {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldExpr> for String {
    fn from(value: FieldExpr) -> Self {
        value.to_string()
    }
}

impl Display for FieldExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchCode => f.write_str("batch_code"),
            Self::StrainName => f.write_str("strain_name"),
            Self::Name => f.write_str("name"),
            Self::Category => f.write_str("category"),
            Self::Brand => f.write_str("brand"),
            Self::Attribute(key) => write!(f, "attr:{key}"),
            Self::NameBefore(separator) => write!(f, "name_before:{separator}"),
        }
    }
}

/// Primary expression with an optional fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub primary: FieldExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FieldExpr>,
}

impl FieldMapping {
    pub fn new(primary: FieldExpr, fallback: Option<FieldExpr>) -> Self {
        Self { primary, fallback }
    }

    pub fn resolve(&self, product: &Product) -> Option<String> {
        self.primary.evaluate(product).or_else(|| {
            self.fallback
                .as_ref()
                .and_then(|fallback| fallback.evaluate(product))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    pub batch_id: FieldMapping,
    pub strain: FieldMapping,
}

impl MappingTable {
    /// Built-in mapping for each source's product shape.
    pub fn default_for(dispensary: DispensaryId) -> Self {
        use FieldExpr::{Attribute, BatchCode, Name, NameBefore, StrainName};

        let attr = |key: &str| Attribute(key.to_owned());
        match dispensary {
            DispensaryId::Muv => Self {
                batch_id: FieldMapping::new(BatchCode, Some(attr("product_id"))),
                strain: FieldMapping::new(StrainName, Some(Name)),
            },
            DispensaryId::Cookies => Self {
                batch_id: FieldMapping::new(attr("batch_name"), None),
                strain: FieldMapping::new(attr("tag"), Some(Name)),
            },
            DispensaryId::Flowery => Self {
                batch_id: FieldMapping::new(attr("batch_num"), Some(attr("sku"))),
                strain: FieldMapping::new(StrainName, Some(Name)),
            },
            DispensaryId::Trulieve => Self {
                batch_id: FieldMapping::new(BatchCode, None),
                strain: FieldMapping::new(attr("strain"), Some(NameBefore(String::from(" - ")))),
            },
            DispensaryId::Curaleaf => Self {
                batch_id: FieldMapping::new(BatchCode, Some(attr("product_id"))),
                strain: FieldMapping::new(StrainName, Some(NameBefore(String::from(" | ")))),
            },
            DispensaryId::GreenDragon | DispensaryId::Sanctuary => Self {
                batch_id: FieldMapping::new(BatchCode, Some(attr("sweed_product_id"))),
                strain: FieldMapping::new(StrainName, Some(Name)),
            },
        }
    }

    pub fn with_batch_id(mut self, mapping: FieldMapping) -> Self {
        self.batch_id = mapping;
        self
    }

    pub fn with_strain(mut self, mapping: FieldMapping) -> Self {
        self.strain = mapping;
        self
    }
}

/// Applies one source's mapping table to its products.
#[derive(Debug, Clone)]
pub struct Extractor {
    table: MappingTable,
}

impl Extractor {
    pub fn new(table: MappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn extract(&self, product: &Product, store: &StoreRef) -> NormalizedBatchRecord {
        NormalizedBatchRecord {
            dispensary: product.source,
            store_id: product.store_id.clone(),
            store_name: store.name.clone(),
            batch_id: self.table.batch_id.resolve(product),
            strain_name: self.table.strain.resolve(product),
            product_name: product.name.clone(),
            category: product.category.clone(),
            region: store.region.clone(),
            last_seen: product.fetched_at,
        }
    }
}

/// Data-completeness counters for one source in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessStats {
    pub total: usize,
    pub with_batch_id: usize,
    pub with_strain: usize,
    /// THC or total terpenes present.
    pub with_potency: usize,
}

impl CompletenessStats {
    pub fn observe(&mut self, product: &Product, record: &NormalizedBatchRecord) {
        self.total += 1;
        if record.batch_id.is_some() {
            self.with_batch_id += 1;
        }
        if record.strain_name.is_some() {
            self.with_strain += 1;
        }
        if product.potency.thc_percent.is_some() || product.potency.total_terpenes_percent.is_some()
        {
            self.with_potency += 1;
        }
    }

    pub fn extraction_failed(&self) -> usize {
        self.total - self.with_batch_id
    }

    pub fn batch_id_percent(&self) -> f64 {
        percent(self.with_batch_id, self.total)
    }

    pub fn strain_percent(&self) -> f64 {
        percent(self.with_strain, self.total)
    }

    pub fn potency_percent(&self) -> f64 {
        percent(self.with_potency, self.total)
    }

    pub fn report(&self) -> CompletenessReport {
        CompletenessReport {
            total: self.total,
            batch_id_percent: self.batch_id_percent(),
            strain_percent: self.strain_percent(),
            potency_percent: self.potency_percent(),
            extraction_failed: self.extraction_failed(),
        }
    }
}

/// Serializable percentages shown in run results and `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub total: usize,
    pub batch_id_percent: f64,
    pub strain_percent: f64,
    pub potency_percent: f64,
    /// Products that yielded no batch id.
    #[serde(default)]
    pub extraction_failed: usize,
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = part as f64 * 100.0 / total as f64;
    (raw * 10.0).round() / 10.0
}
