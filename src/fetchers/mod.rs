//! Fetchers shipped with the engine

pub mod native_stake;

use std::sync::Arc;

use crate::chain::AccountLoader;
use crate::fetcher::Fetcher;

/// Every built-in fetcher, wired to the shared account loader
pub fn default_fetchers(loader: Arc<AccountLoader>) -> Vec<Fetcher> {
    vec![native_stake::fetcher(loader)]
}
