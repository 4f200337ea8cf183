pub mod rate_limit;
pub mod retry;

pub use rate_limit::TokenBucket;
pub use retry::{RetryPolicy, Retryable};

/// Current Unix time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
