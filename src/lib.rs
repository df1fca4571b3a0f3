pub mod config;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod plugins;
pub mod publisher;
pub mod reconciler;
pub mod scheduler;
pub mod scraper;
pub mod state;
pub mod storage;
pub mod trend;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::{Orchestrator, TriggerEvent};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
