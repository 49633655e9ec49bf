use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{decode_records, fetch_json, flexible_id, flexible_number};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const LOCATIONS_URL: &str = "https://api.theflowery.co/wp-json/salve/v1/data/locations";
const PRODUCTS_URL: &str = "https://app.getsalve.co/api/products";
const MAX_PAGES: u64 = 30;

/// The Flowery menus via the Salve product API.
///
/// Stores are discovered from the public locations route; product pages
/// need a bearer token. Without one every store fetch fails as blocked,
/// which opens the circuit on the first attempt. Edibles are dropped.
#[derive(Clone)]
pub struct FloweryAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: Option<HttpAuth>,
}

impl FloweryAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, token: Option<String>) -> Self {
        Self {
            http_client,
            auth: token
                .filter(|token| !token.trim().is_empty())
                .map(HttpAuth::BearerToken),
        }
    }

    async fn discover_stores(&self) -> Result<Vec<StoreRef>, SourceError> {
        let body = fetch_json(
            self.http_client.as_ref(),
            DispensaryId::Flowery,
            HttpRequest::get(LOCATIONS_URL),
        )
        .await?;
        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("locations") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SourceError::schema_shape(
                        "flowery locations response is missing 'locations'",
                    ))
                }
            },
            _ => {
                return Err(SourceError::schema_shape(
                    "flowery locations response is not a list",
                ))
            }
        };

        let (locations, _) = decode_records::<FloweryLocation>(items);
        Ok(locations
            .into_iter()
            .filter_map(|location| {
                let store = StoreRef::new(location.id).ok()?;
                Some(match location.name {
                    Some(name) => store.with_name(name),
                    None => store,
                })
            })
            .collect())
    }

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| SourceError::blocked("flowery bearer token is not configured"))?;

        let fetched_at = UtcDateTime::now();
        let mut products = Vec::new();
        let mut skipped = 0;
        let mut page = 1;
        let mut last_page = 1;

        while page <= last_page.min(MAX_PAGES) {
            let page_text = page.to_string();
            let request = HttpRequest::get(PRODUCTS_URL)
                .with_query(&[("location_id", store.id.as_str()), ("page", page_text.as_str())])
                .with_header("accept", "application/json")
                .with_auth(auth);
            let body = fetch_json(self.http_client.as_ref(), DispensaryId::Flowery, request).await?;

            let items = match body {
                Value::Array(items) => {
                    last_page = page;
                    items
                }
                Value::Object(mut map) => {
                    last_page = map
                        .get("meta")
                        .and_then(|meta| meta.get("last_page"))
                        .and_then(Value::as_u64)
                        .unwrap_or(page);
                    match map.remove("data") {
                        Some(Value::Array(items)) => items,
                        _ => {
                            return Err(SourceError::schema_shape(
                                "flowery products response is missing 'data'",
                            ))
                        }
                    }
                }
                _ => {
                    return Err(SourceError::schema_shape(
                        "flowery products response is not a list",
                    ))
                }
            };

            let (decoded, bad) = decode_records::<FloweryProduct>(items);
            skipped += bad;
            products.extend(
                decoded
                    .into_iter()
                    .filter(|product| !product.is_edible())
                    .map(|product| product.into_product(&store.id, fetched_at)),
            );
            page += 1;
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for FloweryAdapter {
    fn id(&self) -> DispensaryId {
        DispensaryId::Flowery
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::Discovery
    }

    fn categories(&self) -> Vec<String> {
        vec![
            String::from("Flower"),
            String::from("Concentrates"),
            String::from("Vapes"),
        ]
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(self.discover_stores())
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

#[derive(Debug, Deserialize)]
struct FloweryLocation {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FloweryProduct {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default, alias = "batchNumber")]
    batch_num: Option<String>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    categories: Vec<Value>,
    #[serde(default)]
    brand: Option<Value>,
    #[serde(default)]
    strain: Option<Value>,
    #[serde(default, deserialize_with = "flexible_number")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    thc: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    cbd: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    terpenes: Option<f64>,
}

impl FloweryProduct {
    fn category_name(&self) -> Option<String> {
        self.category
            .as_ref()
            .and_then(named)
            .or_else(|| self.categories.iter().find_map(named))
    }

    fn is_edible(&self) -> bool {
        self.category
            .iter()
            .chain(self.categories.iter())
            .filter_map(named)
            .any(|name| name.to_ascii_lowercase().contains("edible"))
    }

    fn into_product(self, store_id: &str, fetched_at: UtcDateTime) -> Product {
        let category = self.category_name();
        let brand = self.brand.as_ref().and_then(named);
        let strain = self.strain.as_ref().and_then(named);

        Product::new(DispensaryId::Flowery, store_id, self.name, fetched_at)
            .with_category(category)
            .with_brand(brand)
            .with_price(self.price)
            .with_potency(Potency {
                thc_percent: self.thc,
                cbd_percent: self.cbd,
                total_terpenes_percent: self.terpenes,
            })
            .with_description(self.description)
            .with_strain_name(strain)
            .with_attribute("product_id", Some(self.id))
            .with_attribute("batch_num", self.batch_num)
            .with_attribute("sku", self.sku)
    }
}

/// Salve nests names as either a plain string or `{"name": ...}`.
fn named(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::RecordingHttpClient;

    #[tokio::test]
    async fn discovers_locations_from_the_public_route() {
        let client = Arc::new(RecordingHttpClient::with_bodies(&[
            r#"{"locations": [{"id": 14, "name": "The Flowery Tampa"}, {"name": "no id"}]}"#,
        ]));
        let adapter = FloweryAdapter::new(client, None);

        let stores = adapter.stores().await.expect("discovery succeeds");

        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].id, "14");
        assert_eq!(stores[0].display_name(), "The Flowery Tampa");
    }

    #[tokio::test]
    async fn pages_products_with_bearer_token_and_drops_edibles() {
        let first = r#"{"data": [
            {"id": 1, "name": "Jack Herer 3.5g", "batch_num": "FL-881", "sku": "SKU-1",
             "category": {"name": "Flower"}, "strain": {"name": "Jack Herer"}, "thc": "19.5"},
            {"id": 2, "name": "Gummies", "categories": ["Edibles"]}
        ], "meta": {"last_page": 2}}"#;
        let second = r#"{"data": [{"id": 3, "name": "Live Rosin", "sku": "SKU-3"}], "meta": {"last_page": 2}}"#;
        let client = Arc::new(RecordingHttpClient::with_bodies(&[first, second]));
        let adapter = FloweryAdapter::new(client.clone(), Some(String::from("secret")));
        let store = StoreRef::new("14").expect("valid store");

        let fetch = adapter.fetch(&store).await.expect("fetch succeeds");

        assert_eq!(fetch.products.len(), 2);
        assert_eq!(fetch.products[0].attribute("batch_num"), Some("FL-881"));
        assert_eq!(fetch.products[0].strain_name.as_deref(), Some("Jack Herer"));
        assert_eq!(fetch.products[1].attribute("sku"), Some("SKU-3"));

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].url.contains("page=2"));
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn missing_token_is_a_blocked_failure_without_upstream_calls() {
        let client = Arc::new(RecordingHttpClient::default());
        let adapter = FloweryAdapter::new(client.clone(), Some(String::from("  ")));
        let store = StoreRef::new("14").expect("valid store");

        let error = adapter.fetch(&store).await.expect_err("no token");

        assert_eq!(error.code(), "source.blocked");
        assert!(client.recorded_requests().is_empty());
    }
}
