use anyhow::{Context, Result};
use std::time::Duration;

/// Main configuration struct containing all engine settings
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub fetchers: FetcherSettings,
    pub rpc: RpcSettings,
    pub activity: ActivitySettings,
}

/// Fetcher orchestration settings
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// Max fetchers executing at once within one aggregation run
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub result_ttl_sec: u64,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            concurrency: 6,
            timeout_ms: 60_000,
            result_ttl_sec: 900,
        }
    }
}

impl FetcherSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_sec)
    }
}

/// RPC endpoint and resilience settings
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub url: String,
    /// Separate endpoint used only for signature/transaction scans
    pub activity_url: Option<String>,
    /// Process-wide cap on in-flight chain calls
    pub concurrency: usize,
    /// Keys per getMultipleAccounts call
    pub fetch_batch_size: usize,
    pub retries: u32,
    pub backoff_ms: u64,
    /// Program scans admitted per second
    pub gpa_rps_limit: u32,
    pub gpa_memo_ttl_ms: u64,
    pub two_step_gpa: bool,
    pub log_requests: bool,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            activity_url: None,
            concurrency: 8,
            fetch_batch_size: 100,
            retries: 2,
            backoff_ms: 250,
            gpa_rps_limit: 30,
            gpa_memo_ttl_ms: 15_000,
            two_step_gpa: false,
            log_requests: false,
        }
    }
}

/// User activity gating settings. All durations in milliseconds.
#[derive(Debug, Clone)]
pub struct ActivitySettings {
    /// Signatures inspected per rebuild decision
    pub max_txs: usize,
    /// Signatures inspected by the per-request prefetch
    pub hard_limit: usize,
    pub backstop_ms: u64,
    pub program_cache_ttl_ms: u64,
    pub program_cache_long_ttl_ms: u64,
    pub dormancy_threshold_ms: u64,
    pub global_sigs_ttl_ms: u64,
}

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            max_txs: 4,
            hard_limit: 20,
            backstop_ms: 48 * HOUR_MS,
            program_cache_ttl_ms: 7 * DAY_MS,
            program_cache_long_ttl_ms: 30 * DAY_MS,
            dormancy_threshold_ms: 30 * DAY_MS,
            global_sigs_ttl_ms: 15_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build configuration from the current process environment only
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let fetchers = FetcherSettings {
            concurrency: get_usize_env("PORTFOLIO_FETCHERS_CONCURRENCY", defaults.fetchers.concurrency)?
                .max(1),
            timeout_ms: get_u64_env("PORTFOLIO_FETCHER_TIMEOUT_MS", defaults.fetchers.timeout_ms)?,
            result_ttl_sec: get_u64_env("PORTFOLIO_FETCHER_RESULT_TTL_SEC", defaults.fetchers.result_ttl_sec)?,
        };

        let rpc = RpcSettings {
            url: get_env_or_default("PORTFOLIO_SOLANA_RPC", &defaults.rpc.url),
            activity_url: std::env::var("PORTFOLIO_SOLANA_HELIUS_RPC")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            concurrency: get_usize_env("PORTFOLIO_SOLANA_RPC_CONCURRENCY", defaults.rpc.concurrency)?.max(1),
            fetch_batch_size: get_usize_env("PORTFOLIO_RPC_FETCH_CONCURRENCY", defaults.rpc.fetch_batch_size)?
                .max(1),
            retries: get_u32_env("PORTFOLIO_RPC_RETRIES", defaults.rpc.retries)?,
            backoff_ms: get_u64_env("PORTFOLIO_RPC_BACKOFF_MS", defaults.rpc.backoff_ms)?,
            gpa_rps_limit: get_u32_env("PORTFOLIO_GPA_RPS", defaults.rpc.gpa_rps_limit)?.max(1),
            gpa_memo_ttl_ms: get_u64_env("PORTFOLIO_GPA_CACHE_TTL_MS", defaults.rpc.gpa_memo_ttl_ms)?,
            two_step_gpa: get_bool_env("PORTFOLIO_SOLANA_TWO_STEP_GPA", defaults.rpc.two_step_gpa),
            log_requests: get_bool_env("PORTFOLIO_RPC_LOGS", defaults.rpc.log_requests),
        };

        let activity = ActivitySettings {
            max_txs: get_usize_env("PORTFOLIO_USER_ACTIVITY_MAX_TXS", defaults.activity.max_txs)?,
            hard_limit: get_usize_env("PORTFOLIO_USER_ACTIVITY_HARD_LIMIT", defaults.activity.hard_limit)?,
            backstop_ms: get_u64_env("PORTFOLIO_USER_ACTIVITY_BACKSTOP_MS", defaults.activity.backstop_ms)?,
            program_cache_ttl_ms: get_u64_env(
                "PORTFOLIO_USER_PROGRAM_CACHE_TTL_MS",
                defaults.activity.program_cache_ttl_ms,
            )?,
            program_cache_long_ttl_ms: get_u64_env(
                "PORTFOLIO_USER_PROGRAM_CACHE_LONG_TTL_MS",
                defaults.activity.program_cache_long_ttl_ms,
            )?,
            dormancy_threshold_ms: get_u64_env(
                "PORTFOLIO_USER_DORMANCY_THRESHOLD_MS",
                defaults.activity.dormancy_threshold_ms,
            )?,
            global_sigs_ttl_ms: get_u64_env(
                "PORTFOLIO_USER_GLOBAL_SIGS_TTL_MS",
                defaults.activity.global_sigs_ttl_ms,
            )?,
        };

        Ok(Config {
            fetchers,
            rpc,
            activity,
        })
    }
}

// ============================================================================
// Helper Functions for Environment Variable Parsing
// ============================================================================

/// Get environment variable or return default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get boolean environment variable with default. Accepts `true`/`1`.
fn get_bool_env(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => raw == "true" || raw == "1",
        Err(_) => default,
    }
}

/// Get u32 environment variable with default
fn get_u32_env(key: &str, default: u32) -> Result<u32> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .context(format!("Failed to parse {} as u32", key))
}

/// Get u64 environment variable with default
fn get_u64_env(key: &str, default: u64) -> Result<u64> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .context(format!("Failed to parse {} as u64", key))
}

fn get_usize_env(key: &str, default: usize) -> Result<usize> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .context(format!("Failed to parse {} as usize", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        std::env::remove_var("PORTFOLIO_FETCHERS_CONCURRENCY");
        std::env::remove_var("PORTFOLIO_GPA_RPS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.fetchers.concurrency, 6);
        assert_eq!(config.rpc.gpa_rps_limit, 30);
        assert_eq!(config.rpc.retries, 2);
        assert_eq!(config.activity.backstop_ms, 48 * 60 * 60 * 1000);
        assert_eq!(config.activity.max_txs, 4);
        assert_eq!(config.activity.hard_limit, 20);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("PORTFOLIO_FETCHERS_CONCURRENCY", "3");
        std::env::set_var("PORTFOLIO_SOLANA_TWO_STEP_GPA", "true");
        let config = Config::from_env().unwrap();
        assert_eq!(config.fetchers.concurrency, 3);
        assert!(config.rpc.two_step_gpa);
        std::env::remove_var("PORTFOLIO_FETCHERS_CONCURRENCY");
        std::env::remove_var("PORTFOLIO_SOLANA_TWO_STEP_GPA");
    }

    #[test]
    #[serial]
    fn test_malformed_number_is_an_error() {
        std::env::set_var("PORTFOLIO_RPC_RETRIES", "lots");
        assert!(Config::from_env().is_err());
        std::env::remove_var("PORTFOLIO_RPC_RETRIES");
    }
}
