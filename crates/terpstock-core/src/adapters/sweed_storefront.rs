use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use super::{fetch_text, flexible_id, flexible_number, number_from_value, static_stores};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const PRODUCT_QUERY: &str = "GetProductByVariantId";

/// Query-cache globals Sweed storefronts assign, newest layout first.
const CACHE_GLOBALS: [&str; 2] = ["window.__sw_qc", "window.__sw"];

/// One Sweed-hosted storefront: where its menus live and what it sells.
#[derive(Debug)]
pub struct StorefrontSite {
    pub dispensary: DispensaryId,
    pub origin: &'static str,
    /// Path between the origin and the store slug, without trailing slash.
    pub shop_path: &'static str,
    /// Display name and menu path of each scraped category.
    pub categories: &'static [(&'static str, &'static str)],
    pub stores: &'static [(&'static str, &'static str, &'static str)],
}

pub static GREEN_DRAGON: StorefrontSite = StorefrontSite {
    dispensary: DispensaryId::GreenDragon,
    origin: "https://shop.greendragon.com",
    shop_path: "",
    categories: &[
        ("Flower", "flower"),
        ("Concentrates", "concentrates"),
        ("Vaporizers", "vaporizers"),
    ],
    stores: &[
        ("avon-park", "Green Dragon - Avon Park", "Central Florida"),
        ("boynton-beach", "Green Dragon - Boynton Beach", "South Florida"),
        ("brandon", "Green Dragon - Brandon", "Tampa Bay"),
        ("cape-coral", "Green Dragon - Cape Coral", "Southwest Florida"),
        ("estero", "Green Dragon - Estero", "Southwest Florida"),
        ("fort-myers", "Green Dragon - Fort Myers", "Southwest Florida"),
        ("fort-pierce", "Green Dragon - Fort Pierce", "Treasure Coast"),
        ("jupiter", "Green Dragon - Jupiter", "South Florida"),
        ("naples", "Green Dragon - Naples", "Southwest Florida"),
        ("orlando", "Green Dragon - Orlando", "Central Florida"),
        ("punta-gorda", "Green Dragon - Punta Gorda", "Southwest Florida"),
        ("sunrise", "Green Dragon - Sunrise", "South Florida"),
        ("tampa", "Green Dragon - Tampa", "Tampa Bay"),
    ],
};

pub static SANCTUARY: StorefrontSite = StorefrontSite {
    dispensary: DispensaryId::Sanctuary,
    origin: "https://sanctuarymed.com",
    shop_path: "/shop/florida",
    categories: &[
        ("Flower", "flower-1384"),
        ("Concentrates", "concentrate-1383"),
        ("Vaporizers", "vaporizers-1386"),
    ],
    stores: &[
        ("bocapalmetto", "Sanctuary - Boca Raton Palmetto", "South Florida"),
        ("bocapowerline", "Sanctuary - Boca Raton Powerline", "South Florida"),
        ("boyntonbeach", "Sanctuary - Boynton Beach", "South Florida"),
        ("clearwater", "Sanctuary - Clearwater", "Tampa Bay"),
        ("daytona", "Sanctuary - Daytona", "Central Florida"),
        ("delraybeach", "Sanctuary - Delray Beach", "South Florida"),
        ("dunedin", "Sanctuary - Dunedin", "Tampa Bay"),
        ("ftpierce", "Sanctuary - Fort Pierce", "Treasure Coast"),
        ("gainesville", "Sanctuary - Gainesville", "North Florida"),
        ("greenacres", "Sanctuary - Greenacres", "South Florida"),
        ("hallandalebeach", "Sanctuary - Hallandale Beach", "South Florida"),
        ("jacksonvillebeach", "Sanctuary - Jacksonville Beach Blvd", "North Florida"),
        ("jacksonvilleedgewood", "Sanctuary - Jacksonville Edgewood", "North Florida"),
        ("jupiter", "Sanctuary - Jupiter", "South Florida"),
        ("marianna", "Sanctuary - Marianna", "Panhandle"),
        ("miami", "Sanctuary - Miami", "South Florida"),
        ("orlandoIdrive", "Sanctuary - Orlando I Drive", "Central Florida"),
        ("orlandoleevista", "Sanctuary - Orlando Lee Vista", "Central Florida"),
        ("palatka", "Sanctuary - Palatka", "North Florida"),
        ("sarasota", "Sanctuary - Sarasota", "Southwest Florida"),
        ("sebring", "Sanctuary - Sebring", "Central Florida"),
        ("stpetersburg", "Sanctuary - St. Petersburg", "Tampa Bay"),
        ("tampa", "Sanctuary - Tampa Waters", "Tampa Bay"),
        ("TampaMidtown", "Sanctuary - Tampa Midtown", "Tampa Bay"),
        ("westpalmbeachokeechobee", "Sanctuary - West Palm Beach", "South Florida"),
    ],
};

/// Menus from Sweed POS storefront HTML (Green Dragon, Sanctuary).
///
/// Category pages only list product links, so each product costs one more
/// page fetch. Product pages embed the storefront's query cache as a JSON
/// object literal; the `GetProductByVariantId` entry holds the product with
/// its variants and lab tests. The first variant's id is the batch code.
#[derive(Clone)]
pub struct SweedStorefrontAdapter {
    site: &'static StorefrontSite,
    http_client: Arc<dyn HttpClient>,
    stores: Vec<StoreRef>,
}

impl SweedStorefrontAdapter {
    pub fn new(site: &'static StorefrontSite, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            site,
            http_client,
            stores: static_stores(site.stores),
        }
    }

    pub fn green_dragon(http_client: Arc<dyn HttpClient>) -> Self {
        Self::new(&GREEN_DRAGON, http_client)
    }

    pub fn sanctuary(http_client: Arc<dyn HttpClient>) -> Self {
        Self::new(&SANCTUARY, http_client)
    }

    pub fn with_stores(mut self, stores: Vec<StoreRef>) -> Self {
        self.stores = stores;
        self
    }

    fn store_root(&self, store: &StoreRef) -> String {
        format!("{}/{}", self.site.shop_path, store.id)
    }

    async fn get_html(&self, url: String) -> Result<String, SourceError> {
        fetch_text(
            self.http_client.as_ref(),
            self.site.dispensary,
            HttpRequest::get(url).with_header("accept", "text/html"),
        )
        .await
    }

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let fetched_at = UtcDateTime::now();
        let store_root = self.store_root(store);
        let mut products = Vec::new();
        let mut skipped = 0;
        let mut seen = BTreeSet::new();

        for (category, path) in self.site.categories {
            let menu_url = format!("{}{store_root}/menu/{path}", self.site.origin);
            let html = self.get_html(menu_url).await?;
            let links = product_links(&html, self.site.origin, &store_root)?;

            for link in links.into_iter().filter(|link| seen.insert(link.slug.clone())) {
                let page = self.get_html(format!("{}{}", self.site.origin, link.path)).await?;
                let Some(product) = product_from_page(self.site.dispensary, &page, &store.id, fetched_at)
                else {
                    skipped += 1;
                    continue;
                };
                // Keep the product's own category, else the menu it was listed under.
                let listed_under = product.category.is_none().then(|| (*category).to_owned());
                let product = match listed_under {
                    Some(category) => product.with_category(Some(category)),
                    None => product,
                };
                products.push(
                    product
                        .with_attribute("product_slug", Some(link.slug))
                        .with_attribute("sweed_product_id", link.sweed_id),
                );
            }
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for SweedStorefrontAdapter {
    fn id(&self) -> DispensaryId {
        self.site.dispensary
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        self.site
            .categories
            .iter()
            .map(|(name, _)| (*name).to_owned())
            .collect()
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProductLink {
    /// Origin-relative path, query string removed.
    path: String,
    slug: String,
    sweed_id: Option<String>,
}

/// Product links on a category page that belong to this store: either
/// `.../product/{slug}` or `.../menu/{category}/{slug}`.
fn product_links(html: &str, origin: &str, store_root: &str) -> Result<Vec<ProductLink>, SourceError> {
    let anchors = Selector::parse("a[href]")
        .map_err(|error| SourceError::internal(format!("invalid link selector: {error}")))?;
    let trailing_id = Regex::new(r"-(\d+)$")
        .map_err(|error| SourceError::internal(format!("invalid product id pattern: {error}")))?;

    let document = Html::parse_document(html);
    let prefix = format!("{store_root}/");
    let mut links = Vec::new();
    let mut seen = BTreeSet::new();

    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let path = href.strip_prefix(origin).unwrap_or(href);
        let path = path.split(['?', '#']).next().unwrap_or_default().trim_end_matches('/');
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };

        let is_product = match rest.split_once('/') {
            Some(("product", slug)) => !slug.is_empty(),
            Some(("menu", after_menu)) => after_menu
                .split_once('/')
                .is_some_and(|(_, slug)| !slug.is_empty()),
            _ => false,
        };
        if !is_product {
            continue;
        }

        let slug = path.rsplit('/').next().unwrap_or_default().to_owned();
        if slug.is_empty() || !seen.insert(slug.clone()) {
            continue;
        }
        let sweed_id = trailing_id
            .captures(&slug)
            .map(|captures| captures[1].to_owned());
        links.push(ProductLink {
            path: path.to_owned(),
            slug,
            sweed_id,
        });
    }
    Ok(links)
}

/// Reads the product out of the page's embedded query cache.
fn product_from_page(
    dispensary: DispensaryId,
    html: &str,
    store_id: &str,
    fetched_at: UtcDateTime,
) -> Option<Product> {
    let cache = CACHE_GLOBALS
        .iter()
        .find_map(|global| embedded_object(html, global))?;
    let data = ["/queries", "/dehydratedState/queries"]
        .iter()
        .filter_map(|pointer| cache.pointer(pointer).and_then(Value::as_array))
        .flatten()
        .find(|query| is_product_query(query))
        .and_then(|query| query.pointer("/state/data"))
        .filter(|data| data.is_object())?;

    serde_json::from_value::<SweedProduct>(data.clone())
        .ok()
        .map(|product| product.into_product(dispensary, store_id, fetched_at))
}

/// Parses the object literal assigned to `global`, ignoring whatever
/// script follows it.
fn embedded_object(html: &str, global: &str) -> Option<Value> {
    let mut offset = 0;
    while let Some(found) = html[offset..].find(global) {
        let after = offset + found + global.len();
        offset = after;
        let rest = html[after..].trim_start();
        // `window.__sw` is a prefix of `window.__sw_qc`.
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        if !rest.starts_with('{') {
            continue;
        }
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        if let Some(Ok(value)) = values.next() {
            return Some(value);
        }
    }
    None
}

fn is_product_query(query: &Value) -> bool {
    let in_hash = query
        .get("queryHash")
        .and_then(Value::as_str)
        .is_some_and(|hash| hash.contains(PRODUCT_QUERY));
    let in_key = query
        .get("queryKey")
        .and_then(Value::as_array)
        .is_some_and(|key| {
            key.iter()
                .filter_map(Value::as_str)
                .any(|part| part.contains(PRODUCT_QUERY))
        });
    in_hash || in_key
}

#[derive(Debug, Deserialize)]
struct SweedProduct {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    brand: Option<Named>,
    #[serde(default)]
    category: Option<Named>,
    #[serde(default)]
    strain: Option<SweedStrain>,
    #[serde(default)]
    variants: Vec<SweedVariant>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SweedStrain {
    name: Option<String>,
    #[serde(default)]
    prevalence: Option<Named>,
    #[serde(default)]
    terpenes: Vec<SweedTerpene>,
}

#[derive(Debug, Deserialize)]
struct SweedTerpene {
    #[serde(default, deserialize_with = "flexible_number")]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SweedVariant {
    #[serde(deserialize_with = "flexible_id")]
    id: String,
    #[serde(default, deserialize_with = "flexible_number")]
    price: Option<f64>,
    #[serde(default, rename = "labTests")]
    lab_tests: Option<Value>,
    #[serde(default, rename = "unitSize")]
    unit_size: Option<UnitSize>,
}

#[derive(Debug, Deserialize)]
struct UnitSize {
    #[serde(default, deserialize_with = "flexible_number")]
    value: Option<f64>,
    #[serde(default, rename = "unitAbbr")]
    unit_abbr: Option<String>,
}

impl SweedProduct {
    fn into_product(self, dispensary: DispensaryId, store_id: &str, fetched_at: UtcDateTime) -> Product {
        let variant = self.variants.into_iter().next();
        let lab = variant.as_ref().and_then(|variant| variant.lab_tests.as_ref());
        let lab_value = |name: &str| {
            lab.and_then(|lab| lab.pointer(&format!("/{name}/value/0")))
                .and_then(number_from_value)
        };
        let (strain, strain_type, terpenes) = match self.strain {
            Some(strain) => {
                let total: f64 = strain.terpenes.iter().filter_map(|terpene| terpene.value).sum();
                let terpenes = (!strain.terpenes.is_empty()).then_some(total);
                (strain.name, strain.prevalence.and_then(|p| p.name), terpenes)
            }
            None => (None, None, None),
        };
        let weight = variant
            .as_ref()
            .and_then(|variant| variant.unit_size.as_ref())
            .and_then(|size| {
                size.value
                    .map(|value| format!("{value}{}", size.unit_abbr.as_deref().unwrap_or_default()))
            });

        Product::new(dispensary, store_id, self.name.trim(), fetched_at)
            .with_category(self.category.and_then(|category| category.name))
            .with_brand(self.brand.and_then(|brand| brand.name))
            .with_price(variant.as_ref().and_then(|variant| variant.price))
            .with_potency(Potency {
                thc_percent: lab_value("thc"),
                cbd_percent: lab_value("cbd"),
                total_terpenes_percent: terpenes,
            })
            .with_description(self.description)
            .with_batch_code(variant.map(|variant| variant.id))
            .with_strain_name(strain)
            .with_attribute("product_id", Some(self.id))
            .with_attribute("strain_type", strain_type)
            .with_attribute("weight", weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::RecordingHttpClient;

    const SANCTUARY_MENU: &str = r#"<html><body>
        <a href="/shop/florida/miami/menu/flower-1384/blue-dream-3-5g-440419?ref=grid">Blue Dream</a>
        <a href="https://sanctuarymed.com/shop/florida/miami/product/gelato-7g-440420">Gelato</a>
        <a href="/shop/florida/miami/menu/flower-1384/blue-dream-3-5g-440419">Blue Dream again</a>
        <a href="/shop/florida/miami/menu/discounts">Deals</a>
        <a href="/shop/florida/tampa/menu/flower-1384/runtz-1">Other store</a>
        <a href="/about-us">About</a>
    </body></html>"#;

    const SANCTUARY_PRODUCT: &str = r#"<html><head><script>
        window.__sw_qc = {"queries":[
            {"queryHash":"[\"/Stores/GetStore\"]","state":{"data":{"id":1,"name":"store"}}},
            {"queryHash":"[\"/Products/GetProductByVariantId\",{\"variantId\":\"164618\"}]",
             "state":{"data":{
                "id":440419,"name":"Blue Dream 3.5g",
                "brand":{"name":"Sanctuary"},
                "category":{"name":"Flower"},
                "description":"Blue Dream is a cross of Blueberry and Haze.",
                "strain":{"name":"Blue Dream","prevalence":{"name":"Hybrid"},
                          "terpenes":[{"name":"Myrcene","value":"1.2"},{"name":"Pinene","value":0.4}]},
                "variants":[{"id":164618,"price":"45.00",
                             "labTests":{"thc":{"value":[24.5]},"cbd":{"value":["0.1"]}},
                             "unitSize":{"value":3.5,"unitAbbr":"g"}}]
             }}}
        ]};
        window.dataLayer = [];
    </script></head><body></body></html>"#;

    const GREEN_DRAGON_PRODUCT: &str = r#"<script>window.__sw = {"dehydratedState":{"queries":[
        {"queryKey":["/Products/GetProductByVariantId",{"variantId":"77"}],
         "state":{"data":{"id":"9001","name":"Sour Diesel","variants":[{"id":"77"}]}}}
    ]}};</script>"#;

    #[test]
    fn keeps_only_this_stores_product_links_once() {
        let links = product_links(SANCTUARY_MENU, SANCTUARY.origin, "/shop/florida/miami")
            .expect("links parse");

        let slugs: Vec<&str> = links.iter().map(|link| link.slug.as_str()).collect();
        assert_eq!(slugs, vec!["blue-dream-3-5g-440419", "gelato-7g-440420"]);
        assert_eq!(links[0].path, "/shop/florida/miami/menu/flower-1384/blue-dream-3-5g-440419");
        assert_eq!(links[1].path, "/shop/florida/miami/product/gelato-7g-440420");
        assert_eq!(links[0].sweed_id.as_deref(), Some("440419"));
    }

    #[test]
    fn reads_the_product_from_the_flat_query_cache() {
        let product = product_from_page(DispensaryId::Sanctuary, SANCTUARY_PRODUCT, "miami", UtcDateTime::now())
            .expect("product in cache");

        assert_eq!(product.name, "Blue Dream 3.5g");
        assert_eq!(product.batch_code.as_deref(), Some("164618"));
        assert_eq!(product.strain_name.as_deref(), Some("Blue Dream"));
        assert_eq!(product.potency.thc_percent, Some(24.5));
        assert_eq!(product.potency.cbd_percent, Some(0.1));
        assert_eq!(product.potency.total_terpenes_percent, Some(1.6));
        assert_eq!(product.price, Some(45.0));
        assert_eq!(product.attribute("strain_type"), Some("Hybrid"));
        assert_eq!(product.attribute("weight"), Some("3.5g"));
    }

    #[test]
    fn reads_the_product_from_the_dehydrated_query_cache() {
        let product = product_from_page(
            DispensaryId::GreenDragon,
            GREEN_DRAGON_PRODUCT,
            "tampa",
            UtcDateTime::now(),
        )
        .expect("product in cache");

        assert_eq!(product.source, DispensaryId::GreenDragon);
        assert_eq!(product.batch_code.as_deref(), Some("77"));
        assert_eq!(product.attribute("product_id"), Some("9001"));
        assert!(product.potency.is_empty());
    }

    #[test]
    fn page_without_a_query_cache_yields_nothing() {
        let page = "<html><script>window.__sw_other = {\"queries\": []};</script></html>";
        assert!(product_from_page(DispensaryId::Sanctuary, page, "miami", UtcDateTime::now()).is_none());
    }

    #[tokio::test]
    async fn fetches_each_listed_product_page_and_counts_unreadable_ones() {
        let client = Arc::new(RecordingHttpClient::with_bodies(&[
            SANCTUARY_MENU,
            SANCTUARY_PRODUCT,
            "<html>maintenance</html>",
            "<html><body></body></html>",
            "<html><body></body></html>",
        ]));
        let store = StoreRef::new("miami").expect("valid store");
        let adapter = SweedStorefrontAdapter::sanctuary(client.clone()).with_stores(vec![store.clone()]);

        let fetch = adapter.fetch(&store).await.expect("fetch succeeds");

        assert_eq!(fetch.products.len(), 1);
        assert_eq!(fetch.skipped, 1);
        assert_eq!(fetch.products[0].attribute("sweed_product_id"), Some("440419"));

        let urls: Vec<String> = client
            .recorded_requests()
            .into_iter()
            .map(|request| request.url)
            .collect();
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[0], "https://sanctuarymed.com/shop/florida/miami/menu/flower-1384");
        assert_eq!(
            urls[1],
            "https://sanctuarymed.com/shop/florida/miami/menu/flower-1384/blue-dream-3-5g-440419"
        );
        assert_eq!(urls[3], "https://sanctuarymed.com/shop/florida/miami/menu/concentrate-1383");
    }

    #[test]
    fn green_dragon_menus_sit_directly_under_the_store_slug() {
        let adapter = SweedStorefrontAdapter::green_dragon(Arc::new(RecordingHttpClient::default()));
        let store = StoreRef::new("avon-park").expect("valid store");

        assert_eq!(adapter.store_root(&store), "/avon-park");
        assert_eq!(adapter.id(), DispensaryId::GreenDragon);
        assert_eq!(adapter.stores.len(), 13);
    }
}
