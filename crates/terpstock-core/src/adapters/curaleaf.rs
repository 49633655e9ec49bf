use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{fetch_text, static_stores};
use crate::data_source::{AdapterFuture, SourceAdapter, SourceError, StoreEnumeration, StoreFetch};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{DispensaryId, Potency, Product, StoreRef, UtcDateTime};

const BASE_URL: &str = "https://curaleaf.com";
const CATEGORIES: [&str; 3] = ["flower", "vape", "concentrates"];

const STORES: [(&str, &str, &str); 6] = [
    ("curaleaf-dispensary-cape-canaveral", "Curaleaf Cape Canaveral", "Space Coast"),
    ("curaleaf-dispensary-south-miami-dade", "Curaleaf South Miami Dade", "South Florida"),
    ("curaleaf-tampa-dale-mabry-midtown", "Curaleaf Tampa Dale Mabry Midtown", "Tampa Bay"),
    ("curaleaf-dispensary-ocala", "Curaleaf Ocala", "Central Florida"),
    ("curaleaf-dispensary-winter-park", "Curaleaf Winter Park", "Central Florida"),
    ("curaleaf-dispensary-gainesville", "Curaleaf Gainesville", "North Florida"),
];

/// Curaleaf menus scraped from the storefront HTML.
///
/// Each product card is an `a[aria-label]` link with id `product-<id>`. The
/// aria label reads `"<name>, <category>. <size> - $<price>"`; cards may
/// also carry `data-batch` and `data-strain` attributes.
#[derive(Clone)]
pub struct CuraleafAdapter {
    http_client: Arc<dyn HttpClient>,
    stores: Vec<StoreRef>,
}

impl CuraleafAdapter {
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

    async fn fetch_store(&self, store: &StoreRef) -> Result<StoreFetch, SourceError> {
        let fetched_at = UtcDateTime::now();
        let mut products = Vec::new();
        let mut skipped = 0;
        let mut seen = BTreeSet::new();

        for category in CATEGORIES {
            let url = format!("{BASE_URL}/shop/florida/{}/categories/{category}", store.id);
            let html = fetch_text(
                self.http_client.as_ref(),
                DispensaryId::Curaleaf,
                HttpRequest::get(url).with_header("accept", "text/html"),
            )
            .await?;

            let page = parse_menu(&html, &store.id, fetched_at)?;
            skipped += page.skipped;
            for product in page.products {
                let id = product.attribute("product_id").map(str::to_owned);
                if id.map_or(true, |id| seen.insert(id)) {
                    products.push(product);
                }
            }
        }

        Ok(StoreFetch::new(products, skipped))
    }
}

impl SourceAdapter for CuraleafAdapter {
    fn id(&self) -> DispensaryId {
        DispensaryId::Curaleaf
    }

    fn enumeration(&self) -> StoreEnumeration {
        StoreEnumeration::StaticList
    }

    fn categories(&self) -> Vec<String> {
        CATEGORIES.iter().map(|category| (*category).to_owned()).collect()
    }

    fn stores<'a>(&'a self) -> AdapterFuture<'a, Vec<StoreRef>> {
        Box::pin(async move { Ok(self.stores.clone()) })
    }

    fn fetch<'a>(&'a self, store: &'a StoreRef) -> AdapterFuture<'a, StoreFetch> {
        Box::pin(self.fetch_store(store))
    }
}

/// Parses one menu page. The document is dropped before returning so the
/// caller's future stays `Send`.
fn parse_menu(html: &str, store_id: &str, fetched_at: UtcDateTime) -> Result<StoreFetch, SourceError> {
    let cards = Selector::parse("a[aria-label]")
        .map_err(|error| SourceError::internal(format!("invalid card selector: {error}")))?;
    let potency = Regex::new(r"(?i)\b(THC|CBD|Terpenes):\s*([\d.]+)\s*%")
        .map_err(|error| SourceError::internal(format!("invalid potency pattern: {error}")))?;

    let document = Html::parse_document(html);
    let mut products = Vec::new();
    let mut skipped = 0;
    let mut card_count = 0;

    for card in document.select(&cards) {
        let Some(label) = card.value().attr("aria-label").filter(|label| label.contains('$')) else {
            continue;
        };
        card_count += 1;
        match parse_card(card, label, &potency, store_id, fetched_at) {
            Some(product) => products.push(product),
            None => skipped += 1,
        }
    }

    if card_count == 0 && !html.contains("product") {
        return Err(SourceError::schema_shape(
            "curaleaf menu page contains no product cards",
        ));
    }
    Ok(StoreFetch::new(products, skipped))
}

fn parse_card(
    card: ElementRef<'_>,
    label: &str,
    potency: &Regex,
    store_id: &str,
    fetched_at: UtcDateTime,
) -> Option<Product> {
    let element = card.value();
    let product_id = element.attr("id")?.strip_prefix("product-")?.to_owned();
    let (name, rest) = label.split_once(", ")?;
    let category = rest.split_once('.').map(|(category, _)| category.trim().to_owned());
    let price = rest
        .rsplit_once('$')
        .and_then(|(_, price)| price.trim().trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok());

    let text: String = card.text().collect::<Vec<_>>().join(" ");
    let mut levels = Potency::default();
    for captures in potency.captures_iter(&text) {
        let value = captures[2].parse().ok();
        match captures[1].to_ascii_uppercase().as_str() {
            "THC" => levels.thc_percent = value,
            "CBD" => levels.cbd_percent = value,
            _ => levels.total_terpenes_percent = value,
        }
    }

    let slug = element
        .attr("href")
        .and_then(|href| href.rsplit('/').next())
        .map(str::to_owned);

    Some(
        Product::new(DispensaryId::Curaleaf, store_id, name.trim(), fetched_at)
            .with_category(category)
            .with_brand(element.attr("data-brand").map(str::to_owned))
            .with_price(price)
            .with_potency(levels)
            .with_batch_code(element.attr("data-batch").map(str::to_owned))
            .with_strain_name(element.attr("data-strain").map(str::to_owned))
            .with_attribute("product_id", Some(product_id))
            .with_attribute("product_slug", slug),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::RecordingHttpClient;

    const FLOWER_PAGE: &str = r#"<html><body>
        <a id="product-901" href="/shop/florida/ocala/products/gelato-35g"
           aria-label="Gelato | Select 3.5g, Flower. 3.5g - $40.00"
           data-batch="CUR-7781" data-strain="Gelato">
           <span>THC: 24.1%</span><span>CBD: 0.1%</span>
        </a>
        <a id="product-902" href="/shop/florida/ocala/products/sour-diesel"
           aria-label="Sour Diesel | Grassroots 7g, Flower. 7g - $65.00">
           <span>THC: 21%</span>
        </a>
        <a aria-label="Promo banner, $5 off"></a>
        <a aria-label="Account menu"></a>
    </body></html>"#;

    #[test]
    fn parses_cards_and_counts_unparseable_ones() {
        let fetch = parse_menu(FLOWER_PAGE, "ocala", UtcDateTime::now()).expect("parse succeeds");

        assert_eq!(fetch.products.len(), 2);
        assert_eq!(fetch.skipped, 1);

        let gelato = &fetch.products[0];
        assert_eq!(gelato.name, "Gelato | Select 3.5g");
        assert_eq!(gelato.category.as_deref(), Some("Flower"));
        assert_eq!(gelato.batch_code.as_deref(), Some("CUR-7781"));
        assert_eq!(gelato.price, Some(40.0));
        assert_eq!(gelato.potency.thc_percent, Some(24.1));
        assert_eq!(gelato.attribute("product_id"), Some("901"));

        assert_eq!(fetch.products[1].batch_code, None);
    }

    #[tokio::test]
    async fn deduplicates_products_listed_in_several_categories() {
        let client = Arc::new(RecordingHttpClient::with_bodies(&[
            FLOWER_PAGE,
            FLOWER_PAGE,
            "<html><body><div class=\"product-grid\"></div></body></html>",
        ]));
        let adapter = CuraleafAdapter::new(client.clone());
        let store = StoreRef::new("ocala").expect("valid store");

        let fetch = adapter.fetch(&store).await.expect("fetch succeeds");

        assert_eq!(fetch.products.len(), 2);
        assert_eq!(client.recorded_requests().len(), 3);
        assert!(client.recorded_requests()[0]
            .url
            .ends_with("/shop/florida/ocala/categories/flower"));
    }

    #[test]
    fn page_without_any_product_markup_is_a_schema_shape_error() {
        let error = parse_menu("<html><body>Access denied</body></html>", "ocala", UtcDateTime::now())
            .expect_err("no cards");
        assert_eq!(error.code(), "source.schema_shape");
    }
}
