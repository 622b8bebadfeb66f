//! Lark Bitable API access
//!
//! Layered bottom-up:
//! - [`Transport`]: one HTTP exchange, classified into an [`AttemptOutcome`]
//! - [`RetryingRequester`]: rate limiting, credentials, retries
//! - [`Paginator`] and [`BatchWriter`]: multi-call table operations
//! - [`BitableClient`]: the facade the CLI and callers use

pub mod batch;
pub mod client;
pub mod pagination;
pub mod rate_limit;
pub mod requester;
pub mod retry;
pub mod source;
pub mod transport;
pub mod types;

pub use batch::{BatchPlanner, BatchWriteReport, BatchWriter, Fields, ItemFailure};
pub use client::{BitableClient, ConnectionCheck, PerformanceMetrics};
pub use pagination::{FetchOutcome, PageFailure, PageResult, PaginationConfig, Paginator, TableRef};
pub use rate_limit::RateLimiter;
pub use requester::{RequestMetrics, RetryingRequester};
pub use retry::RetryPolicy;
pub use source::TableSource;
pub use transport::{classify, HttpTransport, Transport, TransportError};
pub use types::{ApiRequest, AttemptOutcome, ErrorKind, Method, RawResponse};
