//! Retry policy
//!
//! Exponential backoff with jitter, honoring server-requested waits.

mod backoff;

pub use backoff::{RetryPolicy, JITTER_MAX, JITTER_MIN};
