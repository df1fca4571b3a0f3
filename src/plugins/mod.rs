pub mod adapters;
pub mod manager;
pub mod traits;

pub use manager::AdapterRegistry;
pub use traits::{FetchOutput, SourceAdapter};
