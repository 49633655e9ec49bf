use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{decode_records, fetch_json, flexible_id, flexible_number, static_stores, take_array};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const GRAPHQL_URL: &str = "https://www.trulieve.com/api/graphql";
const PAGE_SIZE: usize = 50;
const MAX_PAGES: u32 = 20;

/// Category uids: flower, vapes, concentrates, pre-rolls.
const CATEGORY_UIDS: [(&str, &str); 4] = [
    ("MjA4", "Flower"),
    ("MjM3", "Vapes"),
    ("MjA5", "Concentrates"),
    ("Ng==", "Pre-Rolls"),
];

const STORES: [(&str, &str, &str); 6] = [
    ("palm_coast", "Trulieve Palm Coast", "North Florida"),
    ("tampa_dale_mabry", "Trulieve Tampa Dale Mabry", "Tampa Bay"),
    ("miami_north", "Trulieve Miami North", "South Florida"),
    ("orlando_downtown", "Trulieve Orlando Downtown", "Central Florida"),
    ("tallahassee", "Trulieve Tallahassee", "Panhandle"),
    ("fort_myers", "Trulieve Fort Myers", "Southwest Florida"),
];

const PRODUCTS_QUERY: &str = "query products($searchCriteria:[SearchCriteriaInput!]!,$pageSize:Int=50,$currentPage:Int=1,$sort:ProductAttributeSortInput={}){products(searchCriteria:$searchCriteria,pageSize:$pageSize,currentPage:$currentPage,sort:$sort){items{sku name description batch_codes thc_percentage cbd_percentage total_terpenes custom_attributes_product{code value} configurable_options{attribute_code values{label value}} price_range{minimum_price{final_price{value}}}} total_count}}";

/// Trulieve menus via the storefront GraphQL API (queries sent as GET).
///
/// Every store is paged once per category uid. A product lists its batch
/// codes directly and through configurable options whose attribute code
/// mentions `batch`; one product is emitted per batch code.
#[derive(Clone)]
pub struct TrulieveAdapter {
    http_client: Arc<dyn HttpClient>,
    stores: Vec<StoreRef>,
}

impl TrulieveAdapter {
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

    fn page_request(&self, store: &StoreRef, category_uid: &str, page: u32) -> HttpRequest {
        let variables = json!({
            "currentPage": page,
            "pageSize": PAGE_SIZE,
            "searchCriteria": [
                {"attribute_code": "category_uid", "filter_action": "EQ", "filter_value": category_uid}
            ],
            "sort": {},
        })
        .to_string();

        HttpRequest::get(GRAPHQL_URL)
            .with_query(&[
                ("query", PRODUCTS_QUERY),
                ("operationName", "products"),
                ("variables", variables.as_str()),
            ])
            .with_header("store", &store.id)
            .with_header("x-pylot-query", "products")
    }

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let fetched_at = UtcDateTime::now();
        let mut products = Vec::new();
        let mut skipped = 0;

        for (category_uid, category_name) in CATEGORY_UIDS {
            for page in 1..=MAX_PAGES {
                let body = fetch_json(
                    self.http_client.as_ref(),
                    DispensaryId::Trulieve,
                    self.page_request(store, category_uid, page),
                )
                .await?;
                if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
                    return Err(SourceError::schema_shape(format!(
                        "trulieve graphql errors: {errors}"
                    )));
                }

                let items = take_array(DispensaryId::Trulieve, body, "/data/products/items")?;
                let page_len = items.len();
                let (decoded, bad) = decode_records::<TrulieveProduct>(items);
                skipped += bad;
                for item in decoded {
                    products.extend(item.into_products(&store.id, category_name, fetched_at));
                }

                if page_len < PAGE_SIZE {
                    break;
                }
            }
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for TrulieveAdapter {
    fn id(&self) -> DispensaryId {
        DispensaryId::Trulieve
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        CATEGORY_UIDS.iter().map(|(_, name)| (*name).to_owned()).collect()
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

#[derive(Debug, Deserialize)]
struct TrulieveProduct {
    #[serde(deserialize_with = "flexible_id")]
    sku: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    batch_codes: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "flexible_number")]
    thc_percentage: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    cbd_percentage: Option<f64>,
    #[serde(default, deserialize_with = "flexible_number")]
    total_terpenes: Option<f64>,
    #[serde(default)]
    custom_attributes_product: Option<Vec<TrulieveAttribute>>,
    #[serde(default)]
    configurable_options: Option<Vec<TrulieveOption>>,
    #[serde(default)]
    price_range: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TrulieveAttribute {
    code: String,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TrulieveOption {
    #[serde(default)]
    attribute_code: Option<String>,
    #[serde(default)]
    values: Vec<TrulieveOptionValue>,
}

#[derive(Debug, Deserialize)]
struct TrulieveOptionValue {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

impl TrulieveProduct {
    fn batch_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .batch_codes
            .iter()
            .flatten()
            .filter_map(value_text)
            .collect();

        let option_codes = self
            .configurable_options
            .iter()
            .flatten()
            .filter(|option| {
                option
                    .attribute_code
                    .as_deref()
                    .is_some_and(|code| code.contains("batch"))
            })
            .flat_map(|option| option.values.iter())
            .filter_map(|value| {
                value
                    .label
                    .clone()
                    .filter(|label| !label.trim().is_empty())
                    .or_else(|| value.value.as_ref().and_then(value_text))
            });
        for code in option_codes {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }

    fn strain_attribute(&self) -> Option<String> {
        self.custom_attributes_product
            .iter()
            .flatten()
            .find(|attribute| attribute.code == "strain")
            .and_then(|attribute| attribute.value.as_ref().and_then(value_text))
    }

    fn into_products(self, store_id: &str, category: &str, fetched_at: UtcDateTime) -> Vec<Product> {
        let codes = self.batch_codes();
        let strain = self.strain_attribute();
        let price = self
            .price_range
            .as_ref()
            .and_then(|range| range.pointer("/minimum_price/final_price/value"))
            .and_then(super::number_from_value);

        let base = Product::new(DispensaryId::Trulieve, store_id, self.name, fetched_at)
            .with_category(Some(category.to_owned()))
            .with_brand(Some(String::from("Trulieve")))
            .with_price(price)
            .with_potency(Potency {
                thc_percent: self.thc_percentage,
                cbd_percent: self.cbd_percentage,
                total_terpenes_percent: self.total_terpenes,
            })
            .with_description(self.description)
            .with_attribute("sku", Some(self.sku.clone()))
            .with_attribute("strain", strain);

        if codes.is_empty() {
            return vec![base];
        }
        codes
            .into_iter()
            .map(|code| {
                base.clone()
                    .with_batch_code(Some(format!("{}_{code}", self.sku)))
            })
            .collect()
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::RecordingHttpClient;

    fn page(items: &str) -> String {
        format!(r#"{{"data": {{"products": {{"items": {items}, "total_count": 1}}}}}}"#)
    }

    #[tokio::test]
    async fn expands_batch_codes_and_configurable_batch_options() {
        let flower = page(
            r#"[{
                "sku": "TRU-100",
                "name": "Gelato - 3.5g Whole Flower",
                "batch_codes": ["B1", "B2"],
                "configurable_options": [
                    {"attribute_code": "batch_number", "values": [{"label": "B3"}, {"value": "B1"}]},
                    {"attribute_code": "size", "values": [{"label": "3.5g"}]}
                ],
                "custom_attributes_product": [{"code": "strain", "value": "Gelato"}],
                "thc_percentage": "24.5"
            }, {"name": "no sku"}]"#,
        );
        let empty = page("[]");
        let client = Arc::new(RecordingHttpClient::with_bodies(&[&flower, &empty, &empty, &empty]));
        let adapter = TrulieveAdapter::new(client.clone());
        let store = StoreRef::new("palm_coast").expect("valid store");

        let fetch = adapter.fetch(&store).await.expect("fetch succeeds");

        let batches: Vec<_> = fetch
            .products
            .iter()
            .filter_map(|product| product.batch_code.as_deref())
            .collect();
        assert_eq!(batches, vec!["TRU-100_B1", "TRU-100_B2", "TRU-100_B3"]);
        assert_eq!(fetch.skipped, 1);
        assert_eq!(fetch.products[0].attribute("strain"), Some("Gelato"));
        assert_eq!(fetch.products[0].category.as_deref(), Some("Flower"));

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].url.contains("operationName=products"));
        assert_eq!(requests[0].headers.get("store").map(String::as_str), Some("palm_coast"));
    }

    #[tokio::test]
    async fn graphql_errors_are_schema_shape_failures() {
        let client = Arc::new(RecordingHttpClient::with_bodies(&[
            r#"{"errors": [{"message": "Field 'items' is deprecated"}], "data": null}"#,
        ]));
        let adapter = TrulieveAdapter::new(client);
        let store = StoreRef::new("palm_coast").expect("valid store");

        let error = adapter.fetch(&store).await.expect_err("graphql error");
        assert_eq!(error.code(), "source.schema_shape");
    }
}
