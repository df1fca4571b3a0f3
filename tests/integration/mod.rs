// Integration tests for the CROPS watcher pipeline.
// Stores are served by a local wiremock server; catalog and history live in memory
// unless a test needs SQLite.

pub mod orchestrator_tests;
pub mod pipeline_tests;
pub mod storage_tests;

use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crops_watcher::{
    AppConfig, Orchestrator,
    config::{
        DatabaseConfig, LoggingConfig, MetricsConfig, PublisherConfig, SchedulerConfig,
        ScraperConfig,
    },
    models::{NewStore, Product, StoreId},
    plugins::AdapterRegistry,
    publisher::{BroadcastTransport, ChangeTransport},
    scraper::WebScraper,
    storage::{MemoryCatalog, MemoryPriceHistory, memory::{seed_products, seed_stores}},
};

pub const METRO: StoreId = 1;
pub const SPINNEYS: StoreId = 2;
pub const GOURMET: StoreId = 3;
pub const TALABAT: StoreId = 4;

/// Test configuration for integration tests
pub fn get_test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        scraper: ScraperConfig {
            max_concurrent_stores: 3,
            retry_attempts: 2,
            retry_delay_ms: 10,
            request_timeout: 1,
            store_timeout: 2,
            watchdog_ceiling: 30,
            user_agent: "CropsWatcher-Test/1.0".to_string(),
            politeness_delay_ms: 0,
        },
        scheduler: SchedulerConfig {
            enabled: false,
            interval: "*/5 * * * *".to_string(),
            watchdog_interval: 60,
        },
        publisher: PublisherConfig { channel_capacity: 64 },
        metrics: MetricsConfig {
            enabled: false,
            port: 9001,
        },
        logging: LoggingConfig {
            directory: None,
            level: "debug".to_string(),
        },
    }
}

pub struct TestPipeline {
    pub server: MockServer,
    pub orchestrator: Orchestrator,
    pub catalog: Arc<MemoryCatalog>,
    pub history: Arc<MemoryPriceHistory>,
    pub transport: BroadcastTransport,
}

impl TestPipeline {
    pub async fn product(&self, name: &str) -> Product {
        self.catalog
            .product_by_name(name)
            .await
            .unwrap_or_else(|| panic!("no seeded product named {}", name))
    }
}

/// Seeded catalog whose stores point at a fresh mock server, with the default adapters.
pub async fn create_test_pipeline() -> anyhow::Result<TestPipeline> {
    let transport = BroadcastTransport::new(64);
    create_test_pipeline_with(Arc::new(transport.clone()), transport).await
}

pub async fn create_test_pipeline_with(
    sink: Arc<dyn ChangeTransport>,
    transport: BroadcastTransport,
) -> anyhow::Result<TestPipeline> {
    let config = get_test_config();
    let server = MockServer::start().await;

    let catalog = Arc::new(MemoryCatalog::new());
    for product in seed_products() {
        catalog.add_product(product).await;
    }
    for store in seed_stores() {
        catalog
            .add_store(NewStore {
                base_url: format!("{}/{}/", server.uri(), store.adapter),
                ..store
            })
            .await;
    }

    let history = Arc::new(MemoryPriceHistory::new());
    let registry = AdapterRegistry::new();
    registry
        .initialize_default_adapters(&WebScraper::new(config.scraper.clone())?)
        .await?;

    let orchestrator = Orchestrator::new(
        config.scraper.clone(),
        catalog.clone(),
        history.clone(),
        registry,
        sink,
    );

    Ok(TestPipeline {
        server,
        orchestrator,
        catalog,
        history,
        transport,
    })
}

/// One Metro-style product tile.
pub fn tile(name: &str, price: &str, size: &str) -> String {
    format!(
        r#"<div class="product-tile">
             <a href="/p/{slug}"><img src="/img/{slug}.jpg"></a>
             <h3 class="product-title">{name}</h3>
             <span class="price">EGP {price}</span>
             <span class="product-weight">{size}</span>
           </div>"#,
        slug = name.to_lowercase().replace(' ', "-"),
    )
}

pub fn category_page(tiles: &[String]) -> String {
    format!("<html><body><div class=\"grid\">{}</div></body></html>", tiles.join("\n"))
}

/// Serves `body` on Metro's vegetables page and an empty herbs page.
pub async fn mount_metro(server: &MockServer, body: String, delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/metro/fresh-products/fruits-vegetables"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body).set_delay(delay))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metro/fresh-products/herbs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(category_page(&[])))
        .mount(server)
        .await;
}

/// Every Spinneys category page hangs past the request timeout.
pub async fn mount_spinneys_hanging(server: &MockServer) {
    for page in ["fruits-vegetables", "organic", "fresh-food"] {
        Mock::given(method("GET"))
            .and(path(format!("/spinneys/{}", page)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(category_page(&[]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(server)
            .await;
    }
}

pub async fn mount_talabat(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/talabat/api/grocery/categories/fruits-vegetables/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": { "items": items }
        })))
        .mount(server)
        .await;
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    false
}
