use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{StoreId, StoreStatus};

/// A scrape target. `adapter` names the registered source adapter that knows the site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    pub base_url: String,
    pub adapter: String,
    pub is_active: bool,
    pub status: StoreStatus,
    pub last_scraped: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStore {
    pub name: String,
    pub base_url: String,
    pub adapter: String,
}

impl Store {
    pub fn new(id: StoreId, new_store: NewStore) -> Self {
        Self {
            id,
            name: new_store.name,
            base_url: new_store.base_url,
            adapter: new_store.adapter,
            is_active: true,
            status: StoreStatus::Idle,
            last_scraped: None,
        }
    }

    /// Resolves a possibly relative link found on the store's pages.
    pub fn absolute_url(&self, link: &str) -> String {
        if link.is_empty() || link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }

        match url::Url::parse(&self.base_url).and_then(|base| base.join(link)) {
            Ok(url) => url.to_string(),
            Err(_) => link.to_string(),
        }
    }
}
