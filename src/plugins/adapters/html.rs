use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{clean_text, detect_organic};
use crate::models::{FailureClass, FetchFailure, RawListing, Store};
use crate::normalizer;
use crate::plugins::traits::{FetchOutput, SourceAdapter};
use crate::scraper::WebScraper;
use crate::utils::error::{AppError, Result};

/// CSS selectors describing one store's category pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorProfile {
    pub adapter_type: String,
    pub name: String,
    /// Relative to the store's base URL. Empty means the base URL itself.
    pub category_paths: Vec<String>,
    pub tile: String,
    pub title: String,
    pub price: String,
    pub old_price: Option<String>,
    pub size: Option<String>,
    pub out_of_stock: Option<String>,
    pub link: String,
    pub image: String,
}

impl SelectorProfile {
    pub fn metro() -> Self {
        Self {
            adapter_type: "metro".to_string(),
            name: "Metro Markets".to_string(),
            category_paths: vec![
                "fresh-products/fruits-vegetables".to_string(),
                "fresh-products/herbs".to_string(),
            ],
            tile: ".product-tile, .product-item, .product-card".to_string(),
            title: ".product-title, .product-name, h3".to_string(),
            price: ".price, .current-price, .product-price".to_string(),
            old_price: Some(".old-price, .was-price, .compare-price".to_string()),
            size: Some(".product-weight, .weight, .size".to_string()),
            out_of_stock: Some(".out-of-stock, .unavailable, .not-available".to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    pub fn spinneys() -> Self {
        Self {
            adapter_type: "spinneys".to_string(),
            name: "Spinneys".to_string(),
            category_paths: vec![
                "fruits-vegetables".to_string(),
                "organic".to_string(),
                "fresh-food".to_string(),
            ],
            tile: ".product-item, .product-card, [data-product]".to_string(),
            title: ".product-name, .product-title, h3, h4".to_string(),
            price: ".price, .product-price".to_string(),
            old_price: Some(".old-price, .was-price".to_string()),
            size: Some(".weight, .size, .product-weight".to_string()),
            out_of_stock: Some(".out-of-stock, .unavailable".to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    pub fn gourmet() -> Self {
        Self {
            adapter_type: "gourmet".to_string(),
            name: "Gourmet Egypt".to_string(),
            category_paths: vec![
                "collections/fresh-vegetables".to_string(),
                "collections/fresh-herbs".to_string(),
            ],
            tile: ".product-item, .product-card".to_string(),
            title: ".product-title, .product-name, h3".to_string(),
            price: ".price, .product-price, .price-current".to_string(),
            old_price: Some(".price-original, .was-price, .compare-price".to_string()),
            size: Some(".product-weight, .weight".to_string()),
            out_of_stock: Some(".out-of-stock, .sold-out, .unavailable".to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    /// Rabbit tiles carry no size element; the pack comes from the title.
    pub fn rabbit() -> Self {
        Self {
            adapter_type: "rabbit".to_string(),
            name: "Rabbit".to_string(),
            category_paths: vec![
                "categories/fresh-vegetables".to_string(),
                "categories/fresh-fruits".to_string(),
            ],
            tile: ".product-item, .product-card, .item-card".to_string(),
            title: ".product-name, .item-name, h3, .product-title".to_string(),
            price: ".price, .current-price, .product-price".to_string(),
            old_price: Some(".old-price, .original-price, .was-price".to_string()),
            size: None,
            out_of_stock: Some(".out-of-stock, .unavailable, .sold-out".to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    /// Instashop lists several partner stores on one page; prices are per listing.
    pub fn instashop() -> Self {
        Self {
            adapter_type: "instashop".to_string(),
            name: "Instashop".to_string(),
            category_paths: vec![
                "category/fresh-produce".to_string(),
                "category/fruits-vegetables".to_string(),
            ],
            tile: r#".product-item, .product-card, [data-cy="product-item"]"#.to_string(),
            title: r#".product-name, .product-title, [data-cy="product-name"]"#.to_string(),
            price: r#".product-price, .price-current, [data-cy="product-price"]"#.to_string(),
            old_price: Some(".price-original, .price-before, .old-price".to_string()),
            size: None,
            out_of_stock: Some(r#".out-of-stock, .unavailable, [data-cy="out-of-stock"]"#.to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    pub fn rdna() -> Self {
        Self {
            adapter_type: "rdna".to_string(),
            name: "RDNA".to_string(),
            category_paths: vec![
                "categories/health-nutrition".to_string(),
                "categories/wellness-fitness".to_string(),
            ],
            tile: ".product-item, .product-card, .product-tile".to_string(),
            title: ".product-name, .product-title, h3".to_string(),
            price: ".price, .current-price, .product-price".to_string(),
            old_price: Some(".old-price, .was-price, .strike-price".to_string()),
            size: None,
            out_of_stock: Some(".out-of-stock, .unavailable, .not-available".to_string()),
            link: "a".to_string(),
            image: "img".to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::metro(),
            Self::spinneys(),
            Self::gourmet(),
            Self::rabbit(),
            Self::instashop(),
            Self::rdna(),
        ]
    }
}

struct CompiledSelectors {
    tile: Selector,
    title: Selector,
    price: Selector,
    old_price: Option<Selector>,
    size: Option<Selector>,
    out_of_stock: Option<Selector>,
    link: Selector,
    image: Selector,
}

impl CompiledSelectors {
    fn compile(profile: &SelectorProfile) -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| AppError::Adapter {
                adapter: profile.adapter_type.clone(),
                message: format!("Invalid CSS selector '{}': {:?}", css, e),
            })
        };
        let parse_opt = |css: &Option<String>| css.as_deref().map(parse).transpose();

        Ok(Self {
            tile: parse(&profile.tile)?,
            title: parse(&profile.title)?,
            price: parse(&profile.price)?,
            old_price: parse_opt(&profile.old_price)?,
            size: parse_opt(&profile.size)?,
            out_of_stock: parse_opt(&profile.out_of_stock)?,
            link: parse(&profile.link)?,
            image: parse(&profile.image)?,
        })
    }
}

/// Adapter for stores that render product tiles server-side.
pub struct HtmlCatalogAdapter {
    profile: SelectorProfile,
    selectors: CompiledSelectors,
    scraper: WebScraper,
}

impl HtmlCatalogAdapter {
    pub fn new(profile: SelectorProfile, scraper: WebScraper) -> Result<Self> {
        let selectors = CompiledSelectors::compile(&profile)?;
        Ok(Self {
            profile,
            selectors,
            scraper,
        })
    }

    pub fn profile(&self) -> &SelectorProfile {
        &self.profile
    }

    fn category_urls(&self, store: &Store) -> Vec<String> {
        if self.profile.category_paths.is_empty() {
            return vec![store.base_url.clone()];
        }
        self.profile
            .category_paths
            .iter()
            .map(|path| store.absolute_url(path))
            .collect()
    }

    /// Extracts listings from one category page. Returns the listings and the skip count.
    pub fn parse_page(
        &self,
        store: &Store,
        body: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<(Vec<RawListing>, usize), FetchFailure> {
        let document = Html::parse_document(body);
        let mut listings = Vec::new();
        let mut skipped = 0;

        for tile in document.select(&self.selectors.tile) {
            if cancel.is_cancelled() {
                return Err(cancelled(store));
            }
            match self.parse_tile(store, tile) {
                Some(listing) => listings.push(listing),
                None => skipped += 1,
            }
        }

        Ok((listings, skipped))
    }

    fn parse_tile(&self, store: &Store, tile: ElementRef<'_>) -> Option<RawListing> {
        let name = first_text(tile, &self.selectors.title)?;
        let price = first_text(tile, &self.selectors.price).and_then(|t| normalizer::parse_price(&t))?;

        let mut listing = RawListing::new(store.id, name.clone(), price);
        if !listing.is_valid() {
            tracing::debug!(store_id = store.id, name = %name, "Skipping invalid listing");
            return None;
        }

        if let Some(old_price) = self
            .selectors
            .old_price
            .as_ref()
            .and_then(|s| first_text(tile, s))
            .and_then(|t| normalizer::parse_price(&t))
        {
            listing = listing.with_original_price(old_price);
        }

        let size = self.selectors.size.as_ref().and_then(|s| first_text(tile, s));
        if let Some(pack) = size.or_else(|| normalizer::parse_pack(&name).map(|_| name.clone())) {
            listing = listing.with_pack_size(pack);
        }

        let out_of_stock = self
            .selectors
            .out_of_stock
            .as_ref()
            .is_some_and(|s| tile.select(s).next().is_some());

        let product_url = tile
            .select(&self.selectors.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| store.absolute_url(href));
        let image_url = tile
            .select(&self.selectors.image)
            .next()
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .map(|src| store.absolute_url(src));

        listing.organic_hint = detect_organic(&name);
        Some(
            listing
                .with_availability(!out_of_stock)
                .with_urls(product_url, image_url),
        )
    }
}

#[async_trait]
impl SourceAdapter for HtmlCatalogAdapter {
    fn adapter_type(&self) -> &str {
        &self.profile.adapter_type
    }

    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn fetch(
        &self,
        store: &Store,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchOutput, FetchFailure> {
        let mut output = FetchOutput::default();
        let mut pages_fetched = 0;
        let mut last_failure = None;
        let politeness = self.scraper.config().politeness_delay();

        for (index, url) in self.category_urls(store).into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled(store));
            }
            if index > 0 && !politeness.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled(store)),
                    _ = tokio::time::sleep(politeness) => {}
                }
            }

            tracing::debug!(store_id = store.id, url = %url, "Scraping category page");
            match self.scraper.fetch_page(store.id, &url, cancel).await {
                Ok(page) => {
                    let (listings, skipped) = self.parse_page(store, &page.body, cancel)?;
                    tracing::debug!(
                        store_id = store.id,
                        url = %url,
                        found = listings.len(),
                        skipped,
                        "Parsed category page"
                    );
                    pages_fetched += 1;
                    output.listings.extend(listings);
                    output.skipped += skipped;
                }
                Err(failure)
                    if matches!(failure.class, FailureClass::Blocked | FailureClass::Cancelled) =>
                {
                    return Err(failure);
                }
                Err(failure) => {
                    tracing::warn!(store_id = store.id, url = %url, "Category page failed: {}", failure);
                    output.failed_pages += 1;
                    last_failure = Some(failure);
                }
            }
        }

        if pages_fetched == 0 {
            return Err(last_failure.unwrap_or_else(|| {
                FetchFailure::new(store.id, FailureClass::Unreachable, "no category pages configured")
            }));
        }
        if output.listings.is_empty() && output.skipped == 0 {
            return Err(FetchFailure::new(
                store.id,
                FailureClass::ParseError,
                format!("no product tiles matched '{}'", self.profile.tile),
            ));
        }

        Ok(output)
    }

    async fn health_check(&self, store: &Store) -> bool {
        self.scraper.test_connection(&store.base_url).await
    }
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let text = clean_text(&element.select(selector).next()?.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}

fn cancelled(store: &Store) -> FetchFailure {
    FetchFailure::new(store.id, FailureClass::Cancelled, "cancelled between listings")
}
