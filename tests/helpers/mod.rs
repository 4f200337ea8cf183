// Helper utilities for engine integration tests
//
// This module provides:
// - An in-memory chain (`FakeChain`) with per-method call counters
// - Builders for accounts, signatures and parsed transactions
// - Engine construction over the fake chain with fast test settings

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use portfolio_engine::chain::{
    ChainClient, KeyedAccount, ParsedTransaction, ProgramAccountsQuery, SignatureInfo, SignatureQuery,
};
use portfolio_engine::config::Config;
use portfolio_engine::data::cache::Cache;
use portfolio_engine::data::portfolio::{NetworkId, PortfolioAsset, PortfolioElement, PortfolioElementType};
use portfolio_engine::error::ChainError;
use portfolio_engine::PortfolioEngine;
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Calls made against the fake chain, by method
#[derive(Default)]
pub struct CallCounters {
    pub get_account: AtomicUsize,
    pub get_multiple_accounts: AtomicUsize,
    pub get_program_accounts: AtomicUsize,
    pub get_signatures: AtomicUsize,
    pub get_transaction: AtomicUsize,
}

impl CallCounters {
    pub fn scans(&self) -> usize {
        self.get_program_accounts.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.get_multiple_accounts.load(Ordering::SeqCst)
    }

    pub fn signature_scans(&self) -> usize {
        self.get_signatures.load(Ordering::SeqCst)
    }
}

/// In-memory chain. Program scans ignore filters and return every account
/// registered under the program.
#[derive(Default)]
pub struct FakeChain {
    accounts: Mutex<HashMap<Pubkey, Account>>,
    program_keys: Mutex<HashMap<Pubkey, Vec<Pubkey>>>,
    // newest first
    history: Mutex<HashMap<Pubkey, Vec<SignatureInfo>>>,
    transactions: Mutex<HashMap<String, ParsedTransaction>>,
    pub calls: CallCounters,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_program_account(&self, program_id: &Pubkey, pubkey: Pubkey, account: Account) {
        self.accounts.lock().insert(pubkey, account);
        self.program_keys.lock().entry(*program_id).or_default().push(pubkey);
    }

    /// Close an account: it disappears from scans and fetches
    pub fn close_account(&self, pubkey: &Pubkey) {
        self.accounts.lock().remove(pubkey);
        for keys in self.program_keys.lock().values_mut() {
            keys.retain(|k| k != pubkey);
        }
    }

    /// Record a transaction signed by `signer` invoking `programs`, newest in the owner's history
    pub fn push_transaction(&self, owner: &Pubkey, signature: &str, slot: u64, signer: &Pubkey, programs: &[Pubkey]) {
        self.history.lock().entry(*owner).or_default().insert(
            0,
            SignatureInfo {
                signature: signature.to_string(),
                slot,
                block_time: Some(chrono::Utc::now().timestamp()),
            },
        );
        self.transactions.lock().insert(
            signature.to_string(),
            ParsedTransaction {
                signature: signature.to_string(),
                slot,
                signers: vec![signer.to_string()],
                program_ids: programs.iter().map(|p| p.to_string()).collect(),
                inner_program_ids: vec![],
            },
        );
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, ChainError> {
        self.calls.get_account.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.lock().get(pubkey).cloned())
    }

    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Account>>, ChainError> {
        self.calls.get_multiple_accounts.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.lock();
        Ok(pubkeys.iter().map(|k| accounts.get(k).cloned()).collect())
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        query: &ProgramAccountsQuery,
    ) -> Result<Vec<KeyedAccount>, ChainError> {
        self.calls.get_program_accounts.fetch_add(1, Ordering::SeqCst);
        let keys = self.program_keys.lock().get(program_id).cloned().unwrap_or_default();
        let accounts = self.accounts.lock();
        Ok(keys
            .into_iter()
            .filter_map(|pubkey| {
                let mut account = accounts.get(&pubkey)?.clone();
                if let Some(slice) = query.data_slice {
                    let end = (slice.offset + slice.length).min(account.data.len());
                    account.data = account.data.get(slice.offset..end).unwrap_or_default().to_vec();
                }
                Some(KeyedAccount { pubkey, account })
            })
            .collect())
    }

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        query: &SignatureQuery,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        self.calls.get_signatures.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().get(address).cloned().unwrap_or_default();
        Ok(history
            .into_iter()
            .take_while(|info| query.until.as_deref() != Some(info.signature.as_str()))
            .take(query.limit)
            .collect())
    }

    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError> {
        self.calls.get_transaction.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.lock().get(signature).cloned())
    }
}

/// Defaults with fast retries and a short fetcher timeout
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rpc.backoff_ms = 1;
    config.fetchers.timeout_ms = 300;
    config
}

pub fn engine_with(chain: Arc<FakeChain>, config: Config) -> PortfolioEngine {
    PortfolioEngine::new(config, Cache::in_memory(10_000), chain.clone(), chain)
}

pub fn account_with_data(data: Vec<u8>, owner: &Pubkey) -> Account {
    Account {
        lamports: 1_000_000,
        data,
        owner: *owner,
        executable: false,
        rent_epoch: 0,
    }
}

pub fn element(platform: &str, value: f64) -> PortfolioElement {
    PortfolioElement {
        element_type: PortfolioElementType::Single,
        network_id: NetworkId::Solana,
        platform_id: platform.to_string(),
        label: "Wallet".to_string(),
        value: Some(value),
        assets: vec![PortfolioAsset {
            address: None,
            amount: 1.0,
            price: Some(value),
            value: Some(value),
        }],
    }
}
