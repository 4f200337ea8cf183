// Feature: Activity-Gated Rebuild Decision
//
// Full program scans are the most expensive call class. Before re-scanning a
// (program, user) pair we look at the wallet's recent signatures and only
// rebuild when one of them invokes the program, or when the cached key list
// is older than the backstop interval.

use futures::future::try_join_all;
use moka::future::Cache as MokaCache;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::activity::request_context::{RequestActivityContext, UserRequestActivity};
use crate::chain::client::{ChainClient, ParsedTransaction, SignatureInfo, SignatureQuery};
use crate::chain::guard::RpcGuard;
use crate::config::ActivitySettings;
use crate::data::activity_store::{ActivityStore, ProgramUserActivity, ProgramUserCache, UserActivityCursor};
use crate::error::{ChainError, PortfolioResult};
use crate::utils::now_ms;

const GLOBAL_SIGNATURES_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildDecision {
    pub need_rebuild: bool,
    pub activity: ProgramUserActivity,
    /// Newly observed signatures that invoke the program, newest first
    pub touching_signatures: Vec<String>,
}

/// How a caller holding (or lacking) a cached portfolio should refresh it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// Nothing to serve yet; compute before responding
    Foreground,
    /// Serve the cached result and refresh asynchronously
    Background,
}

/// Pick a refresh mode. Triggers nothing by itself.
///
/// A large backlog of pending changes does not change the outcome today; it is
/// passed so callers can log the distinction.
pub fn choose_rebuild_mode(has_cached_elements: bool, too_many_new_txs: bool) -> RebuildMode {
    if !has_cached_elements {
        return RebuildMode::Foreground;
    }
    if too_many_new_txs {
        debug!("Large backlog of new transactions, refreshing in background");
    }
    RebuildMode::Background
}

pub struct ActivityTracker {
    client: Arc<dyn ChainClient>,
    guard: Arc<RpcGuard>,
    store: ActivityStore,
    context: Arc<RequestActivityContext>,
    settings: ActivitySettings,
    global_signatures: MokaCache<String, Arc<Vec<SignatureInfo>>>,
}

impl ActivityTracker {
    pub fn new(
        client: Arc<dyn ChainClient>,
        guard: Arc<RpcGuard>,
        store: ActivityStore,
        context: Arc<RequestActivityContext>,
        settings: ActivitySettings,
    ) -> Self {
        let global_signatures = MokaCache::builder()
            .max_capacity(GLOBAL_SIGNATURES_CAPACITY)
            .time_to_live(Duration::from_millis(settings.global_sigs_ttl_ms.max(1)))
            .build();
        Self {
            client,
            guard,
            store,
            context,
            settings,
            global_signatures,
        }
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    pub fn context(&self) -> &Arc<RequestActivityContext> {
        &self.context
    }

    /// Signatures newer than `since` (exclusive), newest first, at most `limit`
    pub async fn get_new_user_signatures(
        &self,
        owner: &Pubkey,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        let query = SignatureQuery {
            before: None,
            until: since.map(str::to_string),
            limit,
        };
        self.guard
            .call("getSignaturesForAddress", || self.client.get_signatures_for_address(owner, &query))
            .await
    }

    /// Newest `max_txs` signatures for the owner, shared by all loaders for a short window
    pub async fn global_user_signatures(&self, owner: &Pubkey) -> Result<Arc<Vec<SignatureInfo>>, ChainError> {
        self.global_signatures
            .try_get_with(owner.to_string(), async {
                self.get_new_user_signatures(owner, None, self.settings.max_txs)
                    .await
                    .map(Arc::new)
            })
            .await
            .map_err(|e: Arc<ChainError>| (*e).clone())
    }

    /// Parsed transactions aligned with `signatures`; `None` for ones the node does not have
    pub async fn load_parsed_transactions(
        &self,
        signatures: &[SignatureInfo],
    ) -> Result<Vec<Option<ParsedTransaction>>, ChainError> {
        try_join_all(signatures.iter().map(|info| {
            self.guard.call("getTransaction", move || {
                self.client.get_parsed_transaction(&info.signature)
            })
        }))
        .await
    }

    /// Per-request prefetch: programs invoked by owner-signed transactions
    /// since the stored cursor. Advances and persists the cursor.
    pub async fn update_user_activity_and_get_touched_programs(
        &self,
        owner: &Pubkey,
    ) -> PortfolioResult<(HashSet<String>, UserActivityCursor)> {
        let owner_key = owner.to_string();
        let previous = match self.store.get_user_activity_cursor(&owner_key).await {
            Ok(previous) => previous.unwrap_or_default(),
            Err(e) => {
                debug!("User cursor read failed for {}, scanning from the tip: {}", owner_key, e);
                UserActivityCursor::default()
            }
        };
        let signatures = self
            .get_new_user_signatures(
                owner,
                previous.last_seen_signature.as_deref(),
                self.settings.hard_limit,
            )
            .await?;

        let Some(newest) = signatures.first() else {
            return Ok((HashSet::new(), previous));
        };
        let cursor = UserActivityCursor {
            last_seen_signature: Some(newest.signature.clone()),
            last_seen_slot: Some(newest.slot),
            last_seen_block_time: newest.block_time.or(previous.last_seen_block_time),
        };

        let transactions = self.load_parsed_transactions(&signatures).await?;
        let touched: HashSet<String> = transactions
            .iter()
            .flatten()
            .filter(|tx| tx.is_signed_by(&owner_key))
            .flat_map(|tx| tx.all_program_ids().cloned())
            .collect();

        if let Err(e) = self.store.set_user_activity_cursor(&owner_key, &cursor).await {
            debug!("Failed to persist user cursor for {}: {}", owner_key, e);
        }
        debug!(
            "Wallet {}: {} new signatures, {} programs touched",
            owner_key,
            signatures.len(),
            touched.len()
        );
        Ok((touched, cursor))
    }

    /// Best-effort prefetch feeding the request context. Failures leave the context unset.
    pub async fn prefetch_request_activity(&self, owner: &Pubkey) -> bool {
        match self.update_user_activity_and_get_touched_programs(owner).await {
            Ok((touched_programs, cursor)) => {
                self.context.set_request_activity(UserRequestActivity {
                    owner: owner.to_string(),
                    touched_programs,
                    last_seen_signature: cursor.last_seen_signature,
                    last_seen_slot: cursor.last_seen_slot,
                    created_at: now_ms(),
                });
                true
            }
            Err(e) => {
                debug!("Activity prefetch failed for {}, continuing without it: {}", owner, e);
                false
            }
        }
    }

    pub async fn should_rebuild_accounts(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
        previous: Option<&ProgramUserCache>,
    ) -> PortfolioResult<RebuildDecision> {
        let decision = self.decide(owner, program_id, previous).await?;
        #[cfg(feature = "metrics")]
        crate::metrics::record_rebuild_decision(decision.need_rebuild);
        Ok(decision)
    }

    /// Without a stored cursor the history comes from the shared signature
    /// memo, so a transaction landing within `global_sigs_ttl_ms` of a first
    /// rebuild is only seen once that memo entry expires.
    async fn decide(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
        previous: Option<&ProgramUserCache>,
    ) -> PortfolioResult<RebuildDecision> {
        let now = now_ms();
        let owner_key = owner.to_string();
        let program_key = program_id.to_string();
        let previous_activity = previous.map(|cache| cache.activity.clone()).unwrap_or_default();
        let last_rebuilt_at = previous_activity.last_rebuilt_at.unwrap_or(0);
        let backstop_due = now - last_rebuilt_at > self.settings.backstop_ms as i64;

        if self.context.program_touched_in_request(&owner_key, &program_key) {
            let request = self.context.get_request_activity(&owner_key);
            let activity = ProgramUserActivity {
                last_seen_signature: request
                    .as_ref()
                    .and_then(|r| r.last_seen_signature.clone())
                    .or(previous_activity.last_seen_signature),
                last_seen_slot: request
                    .as_ref()
                    .and_then(|r| r.last_seen_slot)
                    .or(previous_activity.last_seen_slot),
                last_rebuilt_at: Some(now),
            };
            debug!("{} touched {} in this request, rebuilding", owner_key, program_key);
            return Ok(RebuildDecision {
                need_rebuild: true,
                activity,
                touching_signatures: Vec::new(),
            });
        }

        let signatures = match previous_activity.last_seen_signature.as_deref() {
            Some(since) => {
                self.get_new_user_signatures(owner, Some(since), self.settings.max_txs)
                    .await?
            }
            None => (*self.global_user_signatures(owner).await?).clone(),
        };

        let Some(newest) = signatures.first() else {
            if backstop_due {
                info!("Backstop rebuild for {} on {}", owner_key, program_key);
            }
            return Ok(RebuildDecision {
                need_rebuild: backstop_due,
                activity: previous_activity,
                touching_signatures: Vec::new(),
            });
        };
        let activity_cursor = (newest.signature.clone(), newest.slot);

        let transactions = self.load_parsed_transactions(&signatures).await?;
        let touching_signatures: Vec<String> = signatures
            .iter()
            .zip(transactions.iter())
            .filter(|(_, tx)| matches!(tx, Some(tx) if tx.touches_program(&program_key)))
            .map(|(info, _)| info.signature.clone())
            .collect();

        let touched = !touching_signatures.is_empty();
        let activity = ProgramUserActivity {
            last_seen_signature: Some(activity_cursor.0),
            last_seen_slot: Some(activity_cursor.1),
            last_rebuilt_at: if touched {
                Some(now)
            } else {
                previous_activity.last_rebuilt_at
            },
        };
        debug!(
            "{} on {}: {} new signatures, {} touching, backstop_due={}",
            owner_key,
            program_key,
            signatures.len(),
            touching_signatures.len(),
            backstop_due
        );

        Ok(RebuildDecision {
            need_rebuild: touched || backstop_due,
            activity,
            touching_signatures,
        })
    }
}
