use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::error::AppError;

pub mod listing;
pub mod price_change;
pub mod price_record;
pub mod product;
pub mod scrape_run;
pub mod store;

// Re-exports for convenience
pub use listing::*;
pub use price_change::*;
pub use price_record::*;
pub use product::*;
pub use scrape_run::*;
pub use store::*;

pub type ProductId = i64;
pub type StoreId = i64;

// Common enums used across models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    A,
    B,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
        }
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Category::A),
            "B" | "b" => Ok(Category::B),
            other => Err(AppError::Validation(format!("Unknown category: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    #[default]
    Idle,
    Scraping,
    Online,
    Offline,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Idle => "idle",
            StoreStatus::Scraping => "scraping",
            StoreStatus::Online => "online",
            StoreStatus::Offline => "offline",
        }
    }
}

impl FromStr for StoreStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(StoreStatus::Idle),
            "scraping" => Ok(StoreStatus::Scraping),
            "online" => Ok(StoreStatus::Online),
            "offline" => Ok(StoreStatus::Offline),
            other => Err(AppError::Validation(format!("Unknown store status: {}", other))),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Helper function to generate ids in the same shape everywhere
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
