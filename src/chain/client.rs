// Chain Client Abstraction
//
// The engine never talks to an RPC node directly; everything goes through
// `ChainClient`. Errors come back already classified (`ChainErrorKind`), so
// the retry layer never has to inspect message text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_client::rpc_filter::RpcFilterType;
use solana_sdk::{account::Account, pubkey::Pubkey};

use crate::error::ChainError;

/// Byte window of account data returned by a program scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSlice {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramAccountsQuery {
    pub filters: Vec<RpcFilterType>,
    pub data_slice: Option<DataSlice>,
}

impl ProgramAccountsQuery {
    pub fn full(filters: Vec<RpcFilterType>) -> Self {
        Self {
            filters,
            data_slice: None,
        }
    }

    /// Scan returning keys (and lamports) only; no account data is transferred
    pub fn keys_only(filters: Vec<RpcFilterType>) -> Self {
        Self {
            filters,
            data_slice: Some(DataSlice { offset: 0, length: 0 }),
        }
    }
}

/// One program scan hit. `account.data` is empty for keys-only scans.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedAccount {
    pub pubkey: Pubkey,
    pub account: Account,
}

/// History query, newest first. `until` is exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureQuery {
    pub before: Option<String>,
    pub until: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
}

/// The parts of a parsed transaction the activity gate looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTransaction {
    pub signature: String,
    pub slot: u64,
    pub signers: Vec<String>,
    /// Program ids of top-level instructions, in order
    pub program_ids: Vec<String>,
    /// Program ids of inner (CPI) instructions
    pub inner_program_ids: Vec<String>,
}

impl ParsedTransaction {
    pub fn is_signed_by(&self, address: &str) -> bool {
        self.signers.iter().any(|s| s == address)
    }

    pub fn all_program_ids(&self) -> impl Iterator<Item = &String> {
        self.program_ids.iter().chain(self.inner_program_ids.iter())
    }

    /// True if any top-level or inner instruction invokes `program_id`
    pub fn touches_program(&self, program_id: &str) -> bool {
        self.all_program_ids().any(|p| p == program_id)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, ChainError>;

    /// Results are positionally aligned with `pubkeys`
    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Account>>, ChainError>;

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        query: &ProgramAccountsQuery,
    ) -> Result<Vec<KeyedAccount>, ChainError>;

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        query: &SignatureQuery,
    ) -> Result<Vec<SignatureInfo>, ChainError>;

    /// `None` when the node does not know the transaction
    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError>;
}
