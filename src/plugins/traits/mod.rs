pub mod adapter;

pub use adapter::{FetchOutput, SourceAdapter};
