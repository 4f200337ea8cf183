// Feature: Program Account Loading
//
// Entry points fetchers use to read program accounts. The gated path keeps a
// per (program, user) list of discovered account keys and only re-runs the
// filtered scan when the rebuild decision asks for it; otherwise it refetches
// the known keys in batches, which is far cheaper.

use solana_client::rpc_filter::RpcFilterType;
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::{ChainClient, KeyedAccount, ProgramAccountsQuery};
use super::guard::{scan_memo_key, RpcGuard};
use crate::activity::ActivityTracker;
use crate::data::activity_store::{ProgramUserActivity, ProgramUserCache};
use crate::error::{ChainError, PortfolioError, PortfolioResult};
use crate::utils::now_ms;

/// A program account decoded into `T`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAccount<T> {
    pub pubkey: Pubkey,
    pub lamports: u64,
    pub data: T,
}

pub struct AccountLoader {
    client: Arc<dyn ChainClient>,
    guard: Arc<RpcGuard>,
    tracker: Arc<ActivityTracker>,
    batch_size: usize,
    two_step: bool,
}

/// Owner wallet named by the first memcmp filter whose bytes form a public key
pub fn owner_from_filters(filters: &[RpcFilterType]) -> Option<Pubkey> {
    filters.iter().find_map(|filter| match filter {
        RpcFilterType::Memcmp(memcmp) => memcmp
            .bytes()
            .filter(|bytes| bytes.len() == 32)
            .and_then(|bytes| Pubkey::try_from(bytes.as_slice()).ok()),
        _ => None,
    })
}

pub fn split_batches(keys: &[Pubkey], batch_size: usize) -> std::slice::Chunks<'_, Pubkey> {
    keys.chunks(batch_size.max(1))
}

fn check_ceiling(count: usize, max_accounts: Option<usize>) -> PortfolioResult<()> {
    match max_accounts {
        Some(max) if count > max => Err(PortfolioError::TooManyAccounts { count, max }),
        _ => Ok(()),
    }
}

/// Pair keys with fetched payloads, dropping accounts that no longer exist
fn zip_existing(keys: &[Pubkey], accounts: Vec<Option<Account>>) -> Vec<KeyedAccount> {
    keys.iter()
        .zip(accounts)
        .filter_map(|(pubkey, account)| account.map(|account| KeyedAccount { pubkey: *pubkey, account }))
        .collect()
}

fn decode_account<T, E, D>(decode: &D, keyed: KeyedAccount) -> PortfolioResult<ParsedAccount<T>>
where
    D: Fn(&[u8]) -> Result<T, E>,
    E: Display,
{
    let data = decode(&keyed.account.data).map_err(|e| PortfolioError::Decode {
        pubkey: keyed.pubkey.to_string(),
        message: e.to_string(),
    })?;
    Ok(ParsedAccount {
        pubkey: keyed.pubkey,
        lamports: keyed.account.lamports,
        data,
    })
}

impl AccountLoader {
    pub fn new(
        client: Arc<dyn ChainClient>,
        guard: Arc<RpcGuard>,
        tracker: Arc<ActivityTracker>,
        batch_size: usize,
        two_step: bool,
    ) -> Self {
        Self {
            client,
            guard,
            tracker,
            batch_size: batch_size.max(1),
            two_step,
        }
    }

    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, ChainError> {
        self.guard
            .call("getAccountInfo", || self.client.get_account(pubkey))
            .await
    }

    /// Fetch payloads in fixed-size batches; output is aligned with `keys`
    pub async fn get_multiple_accounts_batched(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>, ChainError> {
        let mut accounts = Vec::with_capacity(keys.len());
        for batch in split_batches(keys, self.batch_size) {
            let fetched = self
                .guard
                .call("getMultipleAccounts", || self.client.get_multiple_accounts(batch))
                .await?;
            accounts.extend(fetched);
        }
        Ok(accounts)
    }

    /// Keys matching `filters`, without account data
    pub async fn scan_keys(&self, program_id: &Pubkey, filters: &[RpcFilterType]) -> Result<Vec<Pubkey>, ChainError> {
        let query = ProgramAccountsQuery::keys_only(filters.to_vec());
        let key = scan_memo_key(program_id, filters, query.data_slice);
        let hits = self
            .guard
            .memoized_scan(key, || self.client.get_program_accounts(program_id, &query))
            .await?;
        Ok(hits.iter().map(|hit| hit.pubkey).collect())
    }

    /// Keys matching `filters`, always read from the chain. A rebuild persists
    /// this list as current, so it must not come from the memo.
    async fn scan_keys_fresh(&self, program_id: &Pubkey, filters: &[RpcFilterType]) -> Result<Vec<Pubkey>, ChainError> {
        let query = ProgramAccountsQuery::keys_only(filters.to_vec());
        let hits = self
            .guard
            .scan("getProgramAccounts", || self.client.get_program_accounts(program_id, &query))
            .await?;
        Ok(hits.into_iter().map(|hit| hit.pubkey).collect())
    }

    /// Plain filtered scan. With a ceiling, a keys-only probe runs first so an
    /// oversized result set fails before its payloads are transferred.
    pub async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[RpcFilterType],
        max_accounts: Option<usize>,
    ) -> PortfolioResult<Arc<Vec<KeyedAccount>>> {
        if max_accounts.is_some() {
            let probe = self.scan_keys(program_id, filters).await?;
            check_ceiling(probe.len(), max_accounts)?;
        }
        let query = ProgramAccountsQuery::full(filters.to_vec());
        let key = scan_memo_key(program_id, filters, None);
        Ok(self
            .guard
            .memoized_scan(key, || self.client.get_program_accounts(program_id, &query))
            .await?)
    }

    /// Discover keys, then batch-fetch their payloads
    pub async fn get_program_accounts_two_step(
        &self,
        program_id: &Pubkey,
        filters: &[RpcFilterType],
        max_accounts: Option<usize>,
    ) -> PortfolioResult<Vec<KeyedAccount>> {
        let keys = self.scan_keys(program_id, filters).await?;
        check_ceiling(keys.len(), max_accounts)?;
        let accounts = self.get_multiple_accounts_batched(&keys).await?;
        Ok(zip_existing(&keys, accounts))
    }

    /// Activity-gated load of `owner`'s accounts under `program_id`
    pub async fn load_program_user_accounts(
        &self,
        owner: &Pubkey,
        program_id: &Pubkey,
        filters: &[RpcFilterType],
        max_accounts: Option<usize>,
    ) -> PortfolioResult<Vec<KeyedAccount>> {
        let owner_key = owner.to_string();
        let program_key = program_id.to_string();
        let store = self.tracker.store();

        let previous = match store.get_program_user_cache(&program_key, &owner_key).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Program user cache read failed, treating as miss: {}", e);
                None
            }
        };
        let decision = self
            .tracker
            .should_rebuild_accounts(owner, program_id, previous.as_ref())
            .await?;

        if let (Some(previous), false) = (&previous, decision.need_rebuild) {
            let keys: Vec<Pubkey> = previous
                .account_pubkeys
                .iter()
                .filter_map(|key| Pubkey::from_str(key).ok())
                .collect();
            let accounts = self.get_multiple_accounts_batched(&keys).await?;
            debug!(
                "Reused {} cached keys for {} on {}",
                keys.len(),
                owner_key,
                program_key
            );

            // Signatures already inspected and found untouching need not be parsed again
            if decision.activity != previous.activity {
                let advanced = ProgramUserCache {
                    account_pubkeys: previous.account_pubkeys.clone(),
                    activity: decision.activity.clone(),
                };
                if let Err(e) = store.set_program_user_cache(&program_key, &owner_key, &advanced).await {
                    debug!("Failed to advance cursor for {}: {}", owner_key, e);
                }
            }

            match store.get_user_activity_cursor(&owner_key).await {
                Ok(Some(cursor)) => {
                    if let Err(e) = store
                        .maybe_extend_program_user_cache_ttl(&program_key, &owner_key, &cursor)
                        .await
                    {
                        debug!("TTL extension skipped: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("User cursor read failed: {}", e),
            }
            return Ok(zip_existing(&keys, accounts));
        }

        let keys = self.scan_keys_fresh(program_id, filters).await?;
        check_ceiling(keys.len(), max_accounts)?;
        let accounts = self.get_multiple_accounts_batched(&keys).await?;

        let record = ProgramUserCache {
            account_pubkeys: keys.iter().map(Pubkey::to_string).collect(),
            activity: ProgramUserActivity {
                last_rebuilt_at: Some(now_ms()),
                ..decision.activity
            },
        };
        if let Err(e) = store.set_program_user_cache(&program_key, &owner_key, &record).await {
            warn!("Failed to persist program user cache for {}: {}", owner_key, e);
        }
        info!(
            "Rebuilt {} keys for {} on {} ({} touching signatures)",
            keys.len(),
            owner_key,
            program_key,
            decision.touching_signatures.len()
        );
        Ok(zip_existing(&keys, accounts))
    }

    /// Scan `program_id` and decode every hit with `decode`.
    ///
    /// The owner is taken from the filters, falling back to the wallet of the
    /// current request. With an owner the activity-gated path is used.
    pub async fn get_parsed_program_accounts<T, E, D>(
        &self,
        decode: D,
        program_id: &Pubkey,
        filters: &[RpcFilterType],
        max_accounts: Option<usize>,
    ) -> PortfolioResult<Vec<ParsedAccount<T>>>
    where
        D: Fn(&[u8]) -> Result<T, E> + Send + Sync,
        E: Display,
    {
        let owner = owner_from_filters(filters).or_else(|| {
            self.tracker
                .context()
                .get_any_request_activity()
                .and_then(|activity| Pubkey::from_str(&activity.owner).ok())
        });

        let accounts = match owner {
            Some(owner) => {
                self.load_program_user_accounts(&owner, program_id, filters, max_accounts)
                    .await?
            }
            None if self.two_step => {
                self.get_program_accounts_two_step(program_id, filters, max_accounts)
                    .await?
            }
            None => (*self.get_program_accounts(program_id, filters, max_accounts).await?).clone(),
        };

        accounts
            .into_iter()
            .map(|keyed| decode_account(&decode, keyed))
            .collect()
    }
}
