//! Policy abstractions for delivery operations.
//!
//! - [`RetryPolicy`]: decides whether a failed attempt is retried and when

pub mod retry;

pub use retry::{Backoff, RetryDecision, RetryPolicy};
