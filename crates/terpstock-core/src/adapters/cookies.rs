use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{decode_records, fetch_json, flexible_id, flexible_number, static_stores};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const PRODUCTS_URL: &str = "https://cookiesflorida.co/wp-json/dovetail-api/v1/products";
const PAGE_SIZE: usize = 50;
const MAX_PAGES: u32 = 10;
const CATEGORY: &str = "premium-flower";

const STORES: [(&str, &str, &str); 18] = [
    ("bradenton", "Cookies Bradenton", "Tampa Bay"),
    ("brooksville", "Cookies Brooksville", "Tampa Bay"),
    ("deland-woodland", "Cookies DeLand", "Central Florida"),
    ("fort-myers", "Cookies Fort Myers", "Southwest Florida"),
    ("gainesville", "Cookies Gainesville", "North Florida"),
    ("jacksonville", "Cookies Jacksonville", "North Florida"),
    ("miami", "Cookies Miami", "South Florida"),
    ("n-miami-beach", "Cookies North Miami Beach", "South Florida"),
    ("orange-blossom", "Cookies Orange Blossom", "Central Florida"),
    ("orange-park", "Cookies Orange Park", "North Florida"),
    ("orlando", "Cookies Orlando", "Central Florida"),
    ("palm-bay", "Cookies Palm Bay", "Space Coast"),
    ("pensacola", "Cookies Pensacola", "Panhandle"),
    ("port-charlotte", "Cookies Port Charlotte", "Southwest Florida"),
    ("port-st-lucie", "Cookies Port St. Lucie", "Treasure Coast"),
    ("sanford", "Cookies Sanford", "Central Florida"),
    ("tampa", "Cookies Tampa", "Tampa Bay"),
    ("tampa-fletcher", "Cookies Tampa Fletcher", "Tampa Bay"),
];

/// Cookies Florida menus via the WordPress dovetail route.
///
/// Stores are retailer slugs. The batch name lives in `meta_data`, which the
/// route returns either as an object or as a `[{key, value}]` list; the first
/// tag usually names the strain.
#[derive(Clone)]
pub struct CookiesAdapter {
    http_client: Arc<dyn HttpClient>,
    stores: Vec<StoreRef>,
}

impl CookiesAdapter {
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
        let page = page.to_string();
        let per_page = PAGE_SIZE.to_string();
        HttpRequest::get(PRODUCTS_URL).with_query(&[
            ("page", page.as_str()),
            ("perpage", per_page.as_str()),
            ("orderby", "menu_setting"),
            ("order", "asc"),
            ("retailer", store.id.as_str()),
            ("menutype", "medical"),
            ("categories[]", CATEGORY),
        ])
    }

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let fetched_at = UtcDateTime::now();
        let mut products = Vec::new();
        let mut skipped = 0;

        for page in 1..=MAX_PAGES {
            let body = fetch_json(
                self.http_client.as_ref(),
                DispensaryId::Cookies,
                self.page_request(store, page),
            )
            .await?;
            let items = results(body)?;
            let page_len = items.len();

            let (decoded, bad) = decode_records::<CookiesProduct>(items);
            skipped += bad;
            products.extend(
                decoded
                    .into_iter()
                    .map(|item| item.into_product(&store.id, fetched_at)),
            );

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for CookiesAdapter {
    fn id(&self) -> DispensaryId {
        DispensaryId::Cookies
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        vec![CATEGORY.to_owned()]
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

/// The route answers with `{"results": [...]}` or a bare array.
fn results(body: Value) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(SourceError::schema_shape(
                "cookies response is missing a 'results' array",
            )),
        },
        _ => Err(SourceError::schema_shape(
            "cookies response is neither an object nor an array",
        )),
    }
}

#[derive(Debug, Deserialize)]
struct CookiesProduct {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(alias = "title")]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, deserialize_with = "flexible_number")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    thc: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    cbd: Option<f64>,
    #[serde(default)]
    tags: Vec<Value>,
    #[serde(default)]
    meta_data: Value,
}

impl CookiesProduct {
    fn meta(&self, key: &str) -> Option<String> {
        let raw = match &self.meta_data {
            Value::Object(map) => map.get(key),
            Value::Array(entries) => entries
                .iter()
                .find(|entry| entry.get("key").and_then(Value::as_str) == Some(key))
                .and_then(|entry| entry.get("value")),
            _ => None,
        }?;
        match raw {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    fn first_tag(&self) -> Option<String> {
        self.tags.first().and_then(|tag| match tag {
            Value::String(name) => Some(name.clone()),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
    }

    fn into_product(self, store_id: &str, fetched_at: UtcDateTime) -> Product {
        let batch_name = self.meta("batch_name");
        let terpenes = self
            .meta("total_terpenes")
            .and_then(|text| super::number_from_value(&Value::String(text)));
        let tag = self.first_tag();

        Product::new(DispensaryId::Cookies, store_id, self.name, fetched_at)
            .with_category(self.category.or_else(|| Some(String::from("Flower"))))
            .with_brand(self.brand.or_else(|| Some(String::from("Cookies"))))
            .with_price(self.price)
            .with_potency(Potency {
                thc_percent: self.thc,
                cbd_percent: self.cbd,
                total_terpenes_percent: terpenes,
            })
            .with_description(self.description)
            .with_attribute("product_id", Some(self.id))
            .with_attribute("batch_name", batch_name)
            .with_attribute("tag", tag)
    }
}
