//! Core library for storymap
//!
//! - Resilient Lark Bitable client: token refresh, rate limiting, retries,
//!   pagination and batched writes
//! - Reconciliation of flat story records into a validated tree

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod tree;

#[cfg(test)]
mod testing;

pub use api::{BitableClient, PerformanceMetrics, TableSource};
pub use config::ClientConfig;
pub use error::{AuthExhausted, FetchError, SourceError};
pub use extract::ExtractionDocument;
pub use tree::{BuildReport, FieldMapping, FlatRecord, IdFormat, TreeBuilder, TreeNode, TreeStats};
