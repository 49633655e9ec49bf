use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::{decode_records, fetch_json, flexible_id, flexible_number, static_stores, take_array};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const PRODUCT_LIST_URL: &str =
    "https://web-ui-production.sweedpos.com/_api/proxy/Products/GetProductList";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: u32 = 20;

/// Sweed POS category ids for flower, concentrates and vapes.
const CATEGORY_IDS: [(u32, &str); 3] = [(3485, "Flower"), (3483, "Concentrates"), (3484, "Vapes")];

const STORES: [(&str, &str, &str); 8] = [
    ("298", "MÜV Tampa Dale Mabry", "Tampa Bay"),
    ("299", "MÜV Orlando Colonial", "Central Florida"),
    ("300", "MÜV Miami Kendall", "South Florida"),
    ("313", "MÜV Jacksonville Beach", "North Florida"),
    ("318", "MÜV Gainesville", "North Florida"),
    ("327", "MÜV St. Petersburg", "Tampa Bay"),
    ("352", "MÜV Fort Myers", "Southwest Florida"),
    ("383", "MÜV Tallahassee", "Panhandle"),
];

/// MÜV menus via the Sweed POS product list endpoint.
///
/// The store is selected with the `Storeid` header; each product carries
/// one variant per package size, and each variant is emitted as its own
/// product with batch code `{product_id}_{variant_id}`.
#[derive(Clone)]
pub struct MuvAdapter {
    http_client: Arc<dyn HttpClient>,
    stores: Vec<StoreRef>,
}

impl MuvAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            stores: static_stores(&STORES),
        }
    }

    pub fn with_stores(mut self, stores: Vec<StoreRef>) -> Self {
        self.stores = stores;
        self
    }

    fn page_request(&self, store: &StoreRef, page: u32) -> HttpRequest {
        let categories: Vec<u32> = CATEGORY_IDS.iter().map(|(id, _)| *id).collect();
        let payload = json!({
            "filters": { "category": categories },
            "page": page,
            "pageSize": PAGE_SIZE,
            "sortingMethodId": 7,
            "searchTerm": "",
            "platformOs": "web",
            "sourcePage": 0,
        });
        HttpRequest::post_json(PRODUCT_LIST_URL, &payload).with_header("storeid", &store.id)
    }

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let fetched_at = UtcDateTime::now();
        let mut products = Vec::new();
        let mut skipped = 0;

        for page in 1..=MAX_PAGES {
            let body = fetch_json(
                self.http_client.as_ref(),
                DispensaryId::Muv,
                self.page_request(store, page),
            )
            .await?;
            let items = take_array(DispensaryId::Muv, body, "/list")?;
            let page_len = items.len();

            let (decoded, bad) = decode_records::<MuvProduct>(items);
            skipped += bad;
            for product in decoded {
                let (variants, bad_variants) = product.into_products(&store.id, fetched_at);
                skipped += bad_variants;
                products.extend(variants);
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for MuvAdapter {
    fn id(&self) -> DispensaryId {
        DispensaryId::Muv
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        CATEGORY_IDS.iter().map(|(_, name)| (*name).to_owned()).collect()
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

#[derive(Debug, Deserialize)]
struct MuvProduct {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<MuvNamed>,
    #[serde(default)]
    brand: Option<MuvNamed>,
    #[serde(default)]
    strain: Option<MuvStrain>,
    #[serde(default)]
    variants: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MuvNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MuvStrain {
    name: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MuvVariant {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(default, deserialize_with = "flexible_number")]
    price: Option<f64>,
    #[serde(default, rename = "labTests")]
    lab_tests: Option<MuvLabTests>,
}

#[derive(Debug, Default, Deserialize)]
struct MuvLabTests {
    #[serde(default, deserialize_with = "flexible_number")]
    thc: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    cbd: Option<f64>,
    #[serde(default, rename = "totalTerpenes", deserialize_with = "flexible_number")]
    total_terpenes: Option<f64>,
}

impl MuvProduct {
    fn into_products(self, store_id: &str, fetched_at: UtcDateTime) -> (Vec<Product>, usize) {
        let strain = self
            .strain
            .and_then(|strain| strain.name.filter(|n| !n.trim().is_empty()).or(strain.title));
        let category = self.category.and_then(|c| c.name);
        let brand = self.brand.and_then(|b| b.name);

        let (variants, skipped) = decode_records::<MuvVariant>(self.variants);
        let products = variants
            .into_iter()
            .map(|variant| {
                let lab = variant.lab_tests.unwrap_or_default();
                Product::new(DispensaryId::Muv, store_id, self.name.clone(), fetched_at)
                    .with_category(category.clone())
                    .with_brand(brand.clone())
                    .with_price(variant.price)
                    .with_potency(Potency {
                        thc_percent: lab.thc,
                        cbd_percent: lab.cbd,
                        total_terpenes_percent: lab.total_terpenes,
                    })
                    .with_description(self.description.clone())
                    .with_batch_code(Some(format!("{}_{}", self.id, variant.id)))
                    .with_strain_name(strain.clone())
                    .with_attribute("product_id", Some(self.id.clone()))
                    .with_attribute("variant_id", Some(variant.id))
            })
            .collect();
        (products, skipped)
    }
}
