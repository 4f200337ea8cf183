// Feature: RPC Resilience Layer
//
// Every chain call made by the engine passes through one process-wide guard:
// - a FIFO semaphore capping in-flight calls
// - a token bucket admitting program scans at a fixed rate
// - retry with doubling backoff for transient failures
// - a short-lived memo so identical concurrent scans share one request
//
// Composition for scans is rate limit -> concurrency slot -> retry.

use moka::future::Cache as MokaCache;
use solana_client::rpc_filter::RpcFilterType;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use super::client::{DataSlice, KeyedAccount};
use crate::config::RpcSettings;
use crate::error::ChainError;
use crate::utils::{RetryPolicy, TokenBucket};

const SCAN_MEMO_CAPACITY: u64 = 1_000;

pub struct RpcGuard {
    semaphore: Semaphore,
    concurrency: usize,
    scan_bucket: TokenBucket,
    retry: RetryPolicy,
    scan_memo: Option<MokaCache<String, Arc<Vec<KeyedAccount>>>>,
}

impl RpcGuard {
    pub fn new(settings: &RpcSettings) -> Self {
        let concurrency = settings.concurrency.max(1);
        let scan_memo = (settings.gpa_memo_ttl_ms > 0).then(|| {
            MokaCache::builder()
                .max_capacity(SCAN_MEMO_CAPACITY)
                .time_to_live(Duration::from_millis(settings.gpa_memo_ttl_ms))
                .build()
        });
        Self {
            semaphore: Semaphore::new(concurrency),
            concurrency,
            scan_bucket: TokenBucket::new(settings.gpa_rps_limit),
            retry: RetryPolicy::from_settings(settings),
            scan_memo,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `operation` while holding one concurrency slot. Waiters are admitted in FIFO order.
    pub async fn with_concurrency_limit<F, Fut, T>(&self, operation: F) -> Result<T, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ChainError::other("RPC concurrency limiter closed"))?;
        operation().await
    }

    /// Run `operation` once a scan token is available
    pub async fn with_rate_limit<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.scan_bucket.run(operation).await
    }

    pub async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.retry.retry_async(operation_name, operation).await
    }

    /// Ordinary chain call: concurrency slot, then retry. The slot is held across backoff sleeps.
    pub async fn call<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.with_concurrency_limit(|| self.with_retry(operation_name, operation))
            .await
    }

    /// Program scan: rate limited on top of the ordinary call path
    pub async fn scan<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.with_rate_limit(|| self.call(operation_name, operation)).await
    }

    /// Scan through the memo. Concurrent callers with the same key share one
    /// request; failures are not memoized.
    pub async fn memoized_scan<F, Fut>(&self, key: String, operation: F) -> Result<Arc<Vec<KeyedAccount>>, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<KeyedAccount>, ChainError>>,
    {
        let Some(memo) = &self.scan_memo else {
            return self.scan("getProgramAccounts", operation).await.map(Arc::new);
        };
        memo.try_get_with(key, async { self.scan("getProgramAccounts", operation).await.map(Arc::new) })
            .await
            .map_err(|e: Arc<ChainError>| {
                debug!("Program scan failed: {}", e);
                (*e).clone()
            })
    }
}

/// Memo key for a program scan: program, serialized filters, slice window
pub fn scan_memo_key(program_id: &Pubkey, filters: &[RpcFilterType], data_slice: Option<DataSlice>) -> String {
    let filters_key = serde_json::to_string(filters).unwrap_or_else(|_| format!("{:?}", filters));
    let slice_key = match data_slice {
        Some(slice) => format!("{}+{}", slice.offset, slice.length),
        None => "full".to_string(),
    };
    format!("{}::{}::{}", program_id, filters_key, slice_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainErrorKind;
    use solana_client::rpc_filter::Memcmp;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> RpcSettings {
        RpcSettings {
            concurrency: 2,
            backoff_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let guard = Arc::new(RpcGuard::new(&settings()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    guard
                        .with_concurrency_limit(|| async {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, ChainError>(())
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(guard.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_call_retries_transient_errors() {
        let guard = RpcGuard::new(&settings());
        let calls = AtomicUsize::new(0);
        let result = guard
            .call("getMultipleAccounts", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ChainError::new(ChainErrorKind::RateLimited, "429"))
                } else {
                    Ok(1)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_memoized_scan_collapses_repeat_calls() {
        let guard = RpcGuard::new(&settings());
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let result = guard
                .memoized_scan("prog::[]::full".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                })
                .await;
            assert!(result.unwrap().is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_scan_is_not_memoized() {
        let guard = RpcGuard::new(&RpcSettings {
            retries: 0,
            ..settings()
        });
        let calls = AtomicUsize::new(0);
        let first = guard
            .memoized_scan("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::other("boom"))
            })
            .await;
        assert!(first.is_err());
        let second = guard
            .memoized_scan("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .await;
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_memo_key_distinguishes_filters_and_slice() {
        let program = Pubkey::new_unique();
        let a = vec![RpcFilterType::DataSize(200)];
        let b = vec![
            RpcFilterType::DataSize(200),
            RpcFilterType::Memcmp(Memcmp::new_base58_encoded(44, &[1u8; 32])),
        ];
        let full = scan_memo_key(&program, &a, None);
        assert_eq!(full, scan_memo_key(&program, &a, None));
        assert_ne!(full, scan_memo_key(&program, &b, None));
        assert_ne!(full, scan_memo_key(&program, &a, Some(DataSlice { offset: 0, length: 0 })));
    }
}
