// Feature: Fetch Orchestration
//
// Runs a set of fetchers for one owner. At most `concurrency` execute at once;
// each is spawned as its own task under a timeout so that a hung fetcher is
// reported as failed while its siblings keep going. The timed-out task is not
// aborted: it finishes in the background and may still populate the result
// cache for the next run.

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::activity::ActivityTracker;
use crate::config::FetcherSettings;
use crate::data::activity_store::ActivityStore;
use crate::data::cache::Cache;
use crate::data::portfolio::{
    format_address, format_address_by_network_id, usd_value_sum, AddressSystem, FetcherReport, FetcherResult,
    FetchersResult, NetworkId, PortfolioElement,
};
use crate::error::{PortfolioError, PortfolioResult};
use crate::utils::now_ms;

const FETCHER_RESULT_PREFIX: &str = "fetcher-result";

/// Business logic of one fetcher. Must be idempotent; the orchestrator never retries it.
#[async_trait]
pub trait FetcherExecutor: Send + Sync {
    async fn execute(&self, owner: &str, cache: &Cache) -> anyhow::Result<Vec<PortfolioElement>>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> FetcherExecutor for FnExecutor<F>
where
    F: Fn(String, Cache) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<PortfolioElement>>> + Send + 'static,
{
    async fn execute(&self, owner: &str, cache: &Cache) -> anyhow::Result<Vec<PortfolioElement>> {
        (self.0)(owner.to_string(), cache.clone()).await
    }
}

/// A registered fetcher
#[derive(Clone)]
pub struct Fetcher {
    pub id: String,
    pub network_id: NetworkId,
    pub executor: Arc<dyn FetcherExecutor>,
}

impl Fetcher {
    pub fn new(id: impl Into<String>, network_id: NetworkId, executor: impl FetcherExecutor + 'static) -> Self {
        Self {
            id: id.into(),
            network_id,
            executor: Arc::new(executor),
        }
    }

    /// Fetcher from an async closure taking the owner address and cache handle
    pub fn from_fn<F, Fut>(id: impl Into<String>, network_id: NetworkId, f: F) -> Self
    where
        F: Fn(String, Cache) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<PortfolioElement>>> + Send + 'static,
    {
        Self::new(id, network_id, FnExecutor(f))
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("id", &self.id)
            .field("network_id", &self.network_id)
            .finish()
    }
}

pub struct FetcherRunner {
    cache: Cache,
    activity_store: ActivityStore,
    tracker: Option<Arc<ActivityTracker>>,
    settings: FetcherSettings,
}

impl FetcherRunner {
    pub fn new(
        cache: Cache,
        activity_store: ActivityStore,
        tracker: Option<Arc<ActivityTracker>>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            cache,
            activity_store,
            tracker,
            settings,
        }
    }

    /// Run `fetchers` for `owner` under one address system.
    ///
    /// Fails only on validation errors; individual fetcher failures are
    /// reported in `fetcher_reports`.
    pub async fn run_fetchers(
        &self,
        owner: &str,
        address_system: AddressSystem,
        fetchers: &[Fetcher],
    ) -> PortfolioResult<FetchersResult> {
        let start = Instant::now();
        if let Some(mismatch) = fetchers
            .iter()
            .find(|f| f.network_id.address_system() != address_system)
        {
            return Err(PortfolioError::Validation(format!(
                "Not all fetchers have the right address system: {:?} (fetcher {} targets {:?})",
                address_system, mismatch.id, mismatch.network_id
            )));
        }
        let f_owner = format_address(owner, address_system)?;

        if address_system == AddressSystem::Solana {
            self.prefetch_activity(&f_owner).await;
        }

        let outcomes: Vec<anyhow::Result<FetcherResult>> = stream::iter(fetchers)
            .map(|fetcher| self.run_fetcher(&f_owner, fetcher))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut fetcher_reports = Vec::with_capacity(fetchers.len());
        let mut elements = Vec::new();
        for (fetcher, outcome) in fetchers.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    fetcher_reports.push(FetcherReport::succeeded(&fetcher.id, result.duration));
                    elements.extend(result.elements);
                }
                Err(e) => {
                    warn!("Fetcher {} failed for {}: {}", fetcher.id, f_owner, e);
                    fetcher_reports.push(FetcherReport::failed(&fetcher.id, e.to_string()));
                }
            }
        }

        let value = usd_value_sum(elements.iter().map(|e| &e.value));
        let duration = start.elapsed().as_millis() as u64;
        info!(
            "Ran {} fetchers for {} in {}ms ({} elements)",
            fetchers.len(),
            f_owner,
            duration,
            elements.len()
        );
        Ok(FetchersResult {
            date: now_ms(),
            owner: f_owner,
            address_system,
            fetcher_reports,
            value,
            elements,
            duration,
        })
    }

    /// Run `fetchers` for `owner` where every fetcher must target `network_id`
    pub async fn run_fetchers_by_network_id(
        &self,
        owner: &str,
        network_id: NetworkId,
        fetchers: &[Fetcher],
    ) -> PortfolioResult<FetchersResult> {
        if let Some(mismatch) = fetchers.iter().find(|f| f.network_id != network_id) {
            return Err(PortfolioError::Validation(format!(
                "Not all fetchers have the right network id: {:?} (fetcher {} targets {:?})",
                network_id, mismatch.id, mismatch.network_id
            )));
        }
        self.run_fetchers(owner, network_id.address_system(), fetchers).await
    }

    /// Run a single fetcher with result caching and the timeout
    pub async fn run_fetcher(&self, owner: &str, fetcher: &Fetcher) -> anyhow::Result<FetcherResult> {
        let start = Instant::now();
        let f_owner = format_address_by_network_id(owner, fetcher.network_id)?;
        self.touch_last_computed(&f_owner);

        let cache_key = format!("{}:{}", fetcher.id, f_owner);
        let cached = match self
            .cache
            .get_item::<Vec<PortfolioElement>>(&cache_key, FETCHER_RESULT_PREFIX)
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Result cache read failed for {}: {}", cache_key, e);
                None
            }
        };
        // An empty cached list is a miss
        if let Some(elements) = cached.filter(|elements| !elements.is_empty()) {
            debug!("Result cache hit for {}", cache_key);
            #[cfg(feature = "metrics")]
            crate::metrics::record_fetcher_run("cached");
            return Ok(FetcherResult {
                owner: f_owner,
                fetcher_id: fetcher.id.clone(),
                network_id: fetcher.network_id,
                duration: 0,
                elements,
            });
        }

        let executor = fetcher.executor.clone();
        let cache = self.cache.clone();
        let task_owner = f_owner.clone();
        let ttl = self.settings.result_ttl();
        let task = tokio::spawn(async move {
            let elements: Vec<PortfolioElement> = executor
                .execute(&task_owner, &cache)
                .await?
                .into_iter()
                .map(PortfolioElement::sorted)
                .collect();
            if let Err(e) = cache
                .set_item(&cache_key, &elements, FETCHER_RESULT_PREFIX, Some(ttl))
                .await
            {
                warn!("Result cache write failed for {}: {}", cache_key, e);
            }
            Ok::<_, anyhow::Error>(elements)
        });

        let outcome = match tokio::time::timeout(self.settings.timeout(), task).await {
            Err(_) => Err(anyhow!("Fetcher timed out: {}", fetcher.id)),
            Ok(Err(join_error)) => Err(anyhow!("Fetcher {} aborted: {}", fetcher.id, join_error)),
            Ok(Ok(result)) => result,
        };

        #[cfg(feature = "metrics")]
        crate::metrics::record_fetcher_run(if outcome.is_ok() { "succeeded" } else { "failed" });

        let elements = outcome?;
        Ok(FetcherResult {
            owner: f_owner,
            fetcher_id: fetcher.id.clone(),
            network_id: fetcher.network_id,
            duration: start.elapsed().as_millis() as u64,
            elements,
        })
    }

    async fn prefetch_activity(&self, owner: &str) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        match Pubkey::from_str(owner) {
            Ok(owner) => {
                tracker.prefetch_request_activity(&owner).await;
            }
            Err(e) => debug!("Skipping activity prefetch for {}: {}", owner, e),
        }
    }

    // Fire-and-forget; never delays or fails the fetcher
    fn touch_last_computed(&self, owner: &str) {
        let store = self.activity_store.clone();
        let owner = owner.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.set_user_last_computed(&owner, now_ms()).await {
                debug!("Failed to record last computed time for {}: {}", owner, e);
            }
        });
    }
}
