//! News Digest: policy-gated daily news summarization pipeline.

pub mod agent;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod safety;
pub mod sources;
pub mod workspace;
