// Wallet Portfolio Engine
//
// Aggregates a wallet's holdings across independent fetchers while keeping
// calls to a rate-limited RPC backend cheap:
// - Fetcher orchestration with a concurrency cap, per-fetcher timeout and result cache
// - Activity-gated reuse of discovered program account keys
// - RPC resilience layer (semaphore, scan rate limiter, retry, scan memo)

pub mod activity;
pub mod chain;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod fetchers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod utils;

pub use engine::PortfolioEngine;
pub use error::{ChainError, ChainErrorKind, PortfolioError, PortfolioResult};
pub use fetcher::{Fetcher, FetcherExecutor, FetcherRunner};
