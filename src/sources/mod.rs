//! Content sources.

pub mod perplexity;

pub use perplexity::{PerplexityConfig, PerplexityFetcher};
