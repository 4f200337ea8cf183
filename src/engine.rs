// Process bootstrap
//
// Builds the one-per-process services (guard, request context, tracker,
// loader) and hands them to each other explicitly. Nothing in the crate
// reaches for global state; everything hangs off a `PortfolioEngine`.

use std::sync::Arc;
use tracing::info;

use crate::activity::{ActivityTracker, RequestActivityContext};
use crate::chain::{AccountLoader, ChainClient, RpcChainClient, RpcGuard};
use crate::config::Config;
use crate::data::activity_store::ActivityStore;
use crate::data::cache::Cache;
use crate::fetcher::FetcherRunner;

pub struct PortfolioEngine {
    pub config: Config,
    pub cache: Cache,
    pub guard: Arc<RpcGuard>,
    pub context: Arc<RequestActivityContext>,
    pub tracker: Arc<ActivityTracker>,
    pub loader: Arc<AccountLoader>,
    pub runner: FetcherRunner,
}

impl PortfolioEngine {
    /// Wire the engine around explicit chain clients. `activity_client` serves
    /// signature and transaction reads; `client` serves account reads.
    pub fn new(
        config: Config,
        cache: Cache,
        client: Arc<dyn ChainClient>,
        activity_client: Arc<dyn ChainClient>,
    ) -> Self {
        let guard = Arc::new(RpcGuard::new(&config.rpc));
        let context = Arc::new(RequestActivityContext::new());
        let store = ActivityStore::new(cache.clone(), config.activity.clone());
        let tracker = Arc::new(ActivityTracker::new(
            activity_client,
            guard.clone(),
            store.clone(),
            context.clone(),
            config.activity.clone(),
        ));
        let loader = Arc::new(AccountLoader::new(
            client,
            guard.clone(),
            tracker.clone(),
            config.rpc.fetch_batch_size,
            config.rpc.two_step_gpa,
        ));
        let runner = FetcherRunner::new(cache.clone(), store, Some(tracker.clone()), config.fetchers.clone());

        Self {
            config,
            cache,
            guard,
            context,
            tracker,
            loader,
            runner,
        }
    }

    /// Engine over JSON-RPC clients built from `config.rpc`
    pub fn from_config(config: Config, cache: Cache) -> Self {
        let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(&config.rpc.url, config.rpc.log_requests));
        let activity_client: Arc<dyn ChainClient> = match &config.rpc.activity_url {
            Some(url) => {
                info!("Using dedicated activity RPC endpoint");
                Arc::new(RpcChainClient::new(url, config.rpc.log_requests))
            }
            None => client.clone(),
        };
        Self::new(config, cache, client, activity_client)
    }
}
