use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::models::{FailureClass, FetchFailure, StoreId};
use crate::utils::error::Result;

const BLOCK_MARKERS: [&str; 4] = [
    "captcha",
    "cf-browser-verification",
    "access denied",
    "are you a robot",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    /// After redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub response_time_ms: u64,
}

/// Thin HTTP page fetcher shared by the catalog adapters. Never retries.
#[derive(Clone)]
pub struct WebScraper {
    client: Client,
    config: ScraperConfig,
}

impl WebScraper {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub async fn fetch_page(
        &self,
        store_id: StoreId,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedPage, FetchFailure> {
        let start_time = Instant::now();

        let request = async {
            let response = self
                .client
                .get(url)
                .header("Accept-Language", "en-US,en;q=0.9,ar;q=0.8")
                .send()
                .await?;
            let status = response.status();
            let final_url = response.url().to_string();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, final_url, body))
        };

        let (status, final_url, body) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FetchFailure::new(store_id, FailureClass::Cancelled, "fetch cancelled"));
            }
            result = request => result.map_err(|e| classify_request_error(store_id, url, &e))?,
        };

        if let Some(class) = classify_status(status) {
            return Err(FetchFailure::new(
                store_id,
                class,
                format!("{} returned HTTP {}", url, status.as_u16()),
            ));
        }
        if looks_blocked(&body) {
            return Err(FetchFailure::new(
                store_id,
                FailureClass::Blocked,
                format!("{} served an anti-bot page", url),
            ));
        }

        let response_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(store_id, url, status = status.as_u16(), response_time_ms, "Fetched page");

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            body,
            response_time_ms,
        })
    }

    /// Reachability probe used by adapter health checks.
    pub async fn test_connection(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => classify_status(response.status()).is_none(),
            Err(e) => {
                tracing::debug!(url, "Connection test failed: {}", e);
                false
            }
        }
    }
}

/// Maps a non-success HTTP status to a failure class.
pub fn classify_status(status: StatusCode) -> Option<FailureClass> {
    match status.as_u16() {
        200..=299 => None,
        401 | 403 | 429 => Some(FailureClass::Blocked),
        408 => Some(FailureClass::Timeout),
        500..=599 => Some(FailureClass::ServerError),
        404 | 410 => Some(FailureClass::Unreachable),
        _ => Some(FailureClass::ParseError),
    }
}

fn classify_request_error(store_id: StoreId, url: &str, error: &reqwest::Error) -> FetchFailure {
    let class = if error.is_timeout() {
        FailureClass::Timeout
    } else if error.is_connect() || error.is_request() {
        FailureClass::Unreachable
    } else if error.is_decode() || error.is_body() {
        FailureClass::ParseError
    } else {
        FailureClass::Unreachable
    };
    FetchFailure::new(store_id, class, format!("{}: {}", url, error))
}

fn looks_blocked(body: &str) -> bool {
    let head: String = body.chars().take(4096).collect::<String>().to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| head.contains(marker))
}
