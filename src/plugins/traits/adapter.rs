use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::models::{FetchFailure, RawListing, Store};

/// Everything one store fetch produced, in adapter order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOutput {
    pub listings: Vec<RawListing>,
    /// Tiles that were found but could not be turned into a valid listing.
    pub skipped: usize,
    /// Category pages that failed while others succeeded.
    pub failed_pages: usize,
}

impl FetchOutput {
    pub fn is_partial(&self) -> bool {
        self.skipped > 0 || self.failed_pages > 0
    }
}

/// One implementation per store variant.
///
/// Adapters never retry; the orchestrator owns retry policy. They must check
/// `cancel` between listings and bail out with a `Cancelled` failure.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key matched against `Store::adapter`.
    fn adapter_type(&self) -> &str;
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        store: &Store,
        cancel: &CancellationToken,
    ) -> Result<FetchOutput, FetchFailure>;

    async fn health_check(&self, store: &Store) -> bool;
}
