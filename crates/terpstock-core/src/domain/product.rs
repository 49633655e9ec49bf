use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DispensaryId, UtcDateTime, ValidationError};

/// Upstream store a source adapter fetches one menu for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    pub id: String,
    pub name: Option<String>,
    pub region: Option<String>,
}

impl StoreRef {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyStoreId);
        }
        Ok(Self {
            id,
            name: None,
            region: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Display name, falling back to the raw id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Lab potency values as published on the menu, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Potency {
    pub thc_percent: Option<f64>,
    pub cbd_percent: Option<f64>,
    pub total_terpenes_percent: Option<f64>,
}

impl Potency {
    pub fn is_empty(&self) -> bool {
        self.thc_percent.is_none()
            && self.cbd_percent.is_none()
            && self.total_terpenes_percent.is_none()
    }
}

/// Raw product listing as produced by one source adapter for one store.
///
/// `attributes` carries source-specific fields (sku, tags, batch numbers)
/// that field-mapping expressions can reference as `attr:<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub source: DispensaryId,
    pub store_id: String,
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub potency: Potency,
    pub description: Option<String>,
    pub batch_code: Option<String>,
    pub strain_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub fetched_at: UtcDateTime,
}

impl Product {
    pub fn new(
        source: DispensaryId,
        store_id: impl Into<String>,
        name: impl Into<String>,
        fetched_at: UtcDateTime,
    ) -> Self {
        Self {
            source,
            store_id: store_id.into(),
            name: name.into(),
            category: None,
            brand: None,
            price: None,
            potency: Potency::default(),
            description: None,
            batch_code: None,
            strain_name: None,
            attributes: BTreeMap::new(),
            fetched_at,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = non_blank(category);
        self
    }

    pub fn with_brand(mut self, brand: Option<String>) -> Self {
        self.brand = non_blank(brand);
        self
    }

    pub fn with_price(mut self, price: Option<f64>) -> Self {
        self.price = price.filter(|value| value.is_finite() && *value >= 0.0);
        self
    }

    pub fn with_potency(mut self, potency: Potency) -> Self {
        self.potency = potency;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = non_blank(description);
        self
    }

    pub fn with_batch_code(mut self, batch_code: Option<String>) -> Self {
        self.batch_code = non_blank(batch_code);
        self
    }

    pub fn with_strain_name(mut self, strain_name: Option<String>) -> Self {
        self.strain_name = non_blank(strain_name);
        self
    }

    /// Adds a source-specific attribute; blank values are dropped.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        if let Some(value) = non_blank(value) {
            self.attributes.insert(key.into(), value);
        }
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_drops_blank_optional_fields() {
        let product = Product::new(DispensaryId::Muv, "298", "Blue Dream", UtcDateTime::now())
            .with_batch_code(Some(String::from("   ")))
            .with_strain_name(Some(String::from(" Blue Dream ")))
            .with_attribute("sku", Some(String::new()))
            .with_price(Some(f64::NAN));

        assert_eq!(product.batch_code, None);
        assert_eq!(product.strain_name.as_deref(), Some("Blue Dream"));
        assert!(product.attributes.is_empty());
        assert_eq!(product.price, None);
    }

    #[test]
    fn store_ref_requires_an_id() {
        assert_eq!(StoreRef::new(" "), Err(ValidationError::EmptyStoreId));
        let store = StoreRef::new("tampa-3").expect("valid store");
        assert_eq!(store.display_name(), "tampa-3");
    }
}
