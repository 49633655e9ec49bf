//! # Source Adapters
//!
//! One adapter per upstream dispensary menu.
//!
//! | Adapter | Protocol | Stores | Categories |
//! |---------|----------|--------|------------|
//! | [`MuvAdapter`] | REST JSON (Sweed POS) | static id list | flower, concentrates, vapes |
//! | [`TrulieveAdapter`] | GraphQL over GET | static slugs | category uids per store |
//! | [`CookiesAdapter`] | REST JSON (WordPress) | static retailer slugs | all |
//! | [`FloweryAdapter`] | REST JSON, bearer token | discovery call | all |
//! | [`CuraleafAdapter`] | HTML menu scraping | static slugs | flower, vape, concentrates |
//! | [`SweedStorefrontAdapter`] | HTML + embedded query cache (Sweed POS) | static slugs | flower, concentrates, vaporizers |
//!
//! Green Dragon and Sanctuary share the storefront adapter; they differ only
//! in their [`StorefrontSite`] description.

mod cookies;
mod curaleaf;
mod flowery;
mod muv;
mod sweed_storefront;
mod trulieve;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::data_source::{SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, StoreRef};

pub use cookies::CookiesAdapter;
pub use curaleaf::CuraleafAdapter;
pub use flowery::FloweryAdapter;
pub use muv::MuvAdapter;
pub use sweed_storefront::{StorefrontSite, SweedStorefrontAdapter, GREEN_DRAGON, SANCTUARY};
pub use trulieve::TrulieveAdapter;

/// Builds the adapter for `dispensary` over a shared transport.
///
/// `stores` overrides the built-in store list for static-list adapters;
/// `token` is only used by sources that authenticate.
pub fn build_adapter(
    dispensary: DispensaryId,
    http_client: Arc<dyn HttpClient>,
    stores: Option<Vec<StoreRef>>,
    token: Option<String>,
) -> Arc<dyn SourceAdapter> {
    match dispensary {
        DispensaryId::Muv => {
            let adapter = MuvAdapter::new(http_client);
            Arc::new(match stores {
                Some(stores) => adapter.with_stores(stores),
                None => adapter,
            })
        }
        DispensaryId::Trulieve => {
            let adapter = TrulieveAdapter::new(http_client);
            Arc::new(match stores {
                Some(stores) => adapter.with_stores(stores),
                None => adapter,
            })
        }
        DispensaryId::Cookies => {
            let adapter = CookiesAdapter::new(http_client);
            Arc::new(match stores {
                Some(stores) => adapter.with_stores(stores),
                None => adapter,
            })
        }
        DispensaryId::Flowery => Arc::new(FloweryAdapter::new(http_client, token)),
        DispensaryId::Curaleaf => {
            let adapter = CuraleafAdapter::new(http_client);
            Arc::new(match stores {
                Some(stores) => adapter.with_stores(stores),
                None => adapter,
            })
        }
        DispensaryId::GreenDragon | DispensaryId::Sanctuary => {
            let site = if dispensary == DispensaryId::GreenDragon {
                &GREEN_DRAGON
            } else {
                &SANCTUARY
            };
            let adapter = SweedStorefrontAdapter::new(site, http_client);
            Arc::new(match stores {
                Some(stores) => adapter.with_stores(stores),
                None => adapter,
            })
        }
    }
}

/// Executes `request` and decodes a JSON body, mapping failures onto the
/// source error taxonomy.
pub(crate) async fn fetch_json(
    http_client: &dyn HttpClient,
    source: DispensaryId,
    request: HttpRequest,
) -> Result<Value, SourceError> {
    let body = fetch_text(http_client, source, request).await?;
    serde_json::from_str(&body).map_err(|error| {
        SourceError::schema_shape(format!("{source} returned a non-JSON body: {error}"))
    })
}

pub(crate) async fn fetch_text(
    http_client: &dyn HttpClient,
    source: DispensaryId,
    request: HttpRequest,
) -> Result<String, SourceError> {
    let response = http_client
        .execute(request)
        .await
        .map_err(|error| SourceError::from_transport(source, &error))?;

    if !response.is_success() {
        return Err(SourceError::from_status(source, &response));
    }
    Ok(response.body)
}

/// Decodes each element independently; elements that do not match `T`
/// are dropped and counted.
pub(crate) fn decode_records<T: DeserializeOwned>(items: Vec<Value>) -> (Vec<T>, usize) {
    let mut decoded = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match serde_json::from_value::<T>(item) {
            Ok(record) => decoded.push(record),
            Err(_) => skipped += 1,
        }
    }
    (decoded, skipped)
}

/// Takes the array at `pointer`, or reports a schema-shape error.
pub(crate) fn take_array(
    source: DispensaryId,
    mut body: Value,
    pointer: &str,
) -> Result<Vec<Value>, SourceError> {
    match body.pointer_mut(pointer).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(SourceError::schema_shape(format!(
            "{source} response is missing '{pointer}'"
        ))),
        Some(_) => Err(SourceError::schema_shape(format!(
            "{source} response field '{pointer}' is not an array"
        ))),
    }
}

/// Accepts upstream ids that arrive as either numbers or strings.
pub(crate) fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(text) => Ok(text),
        RawId::Number(number) => Ok(number.to_string()),
    }
}

/// Prices and percentages sometimes arrive as strings ("29.99", "21.4%").
pub(crate) fn flexible_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| number_from_value(&value)))
}

pub(crate) fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn static_stores(ids: &[(&str, &str, &str)]) -> Vec<StoreRef> {
    ids.iter()
        .filter_map(|(id, name, region)| {
            StoreRef::new(*id)
                .ok()
                .map(|store| store.with_name(*name).with_region(*region))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};

    /// Returns queued responses in order and records every request.
    #[derive(Debug, Default)]
    pub struct RecordingHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        pub fn with_bodies(bodies: &[&str]) -> Self {
            let client = Self::default();
            for body in bodies {
                client.push(Ok(HttpResponse::ok(*body)));
            }
            client
        }

        pub fn push(&self, response: Result<HttpResponse, HttpError>) {
            self.responses
                .lock()
                .expect("response queue should not be poisoned")
                .push_back(response);
        }

        pub fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("response queue should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no canned response left")));
            Box::pin(async move { response })
        }
    }
}
