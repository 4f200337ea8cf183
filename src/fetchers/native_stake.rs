// Native SOL stake accounts, found by withdrawer authority.
//
// Stake account layout (bincode StakeStateV2, 200 bytes):
//   0..4    enum tag
//   4..12   rent exempt reserve
//   12..44  staker
//   44..76  withdrawer

use async_trait::async_trait;
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey, stake::state::StakeStateV2};
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::{AccountLoader, ParsedAccount};
use crate::data::cache::Cache;
use crate::data::portfolio::{NetworkId, PortfolioAsset, PortfolioElement, PortfolioElementType};
use crate::fetcher::{Fetcher, FetcherExecutor};

pub const FETCHER_ID: &str = "native-stake";
pub const PLATFORM_ID: &str = "native-stake";
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

const STAKE_ACCOUNT_SIZE: u64 = 200;
const WITHDRAWER_OFFSET: usize = 44;
const MAX_STAKE_ACCOUNTS: usize = 1_000;

pub fn decode_stake_state(data: &[u8]) -> Result<StakeStateV2, bincode::Error> {
    bincode::deserialize(data)
}

pub fn withdrawer_filters(owner: &Pubkey) -> Vec<RpcFilterType> {
    vec![
        RpcFilterType::DataSize(STAKE_ACCOUNT_SIZE),
        RpcFilterType::Memcmp(Memcmp::new_base58_encoded(WITHDRAWER_OFFSET, owner.as_ref())),
    ]
}

/// One element listing every initialized or delegated stake account, or `None` if there are none
pub fn stake_element(accounts: &[ParsedAccount<StakeStateV2>]) -> Option<PortfolioElement> {
    let assets: Vec<PortfolioAsset> = accounts
        .iter()
        .filter(|account| matches!(account.data, StakeStateV2::Stake(..) | StakeStateV2::Initialized(_)))
        .map(|account| PortfolioAsset {
            address: Some(SOL_MINT.to_string()),
            amount: account.lamports as f64 / LAMPORTS_PER_SOL as f64,
            price: None,
            value: None,
        })
        .collect();

    if assets.is_empty() {
        return None;
    }
    Some(PortfolioElement {
        element_type: PortfolioElementType::Multiple,
        network_id: NetworkId::Solana,
        platform_id: PLATFORM_ID.to_string(),
        label: "Staked".to_string(),
        value: None,
        assets,
    })
}

struct NativeStakeExecutor {
    loader: Arc<AccountLoader>,
}

#[async_trait]
impl FetcherExecutor for NativeStakeExecutor {
    async fn execute(&self, owner: &str, _cache: &Cache) -> anyhow::Result<Vec<PortfolioElement>> {
        let owner = Pubkey::from_str(owner)?;
        let accounts = self
            .loader
            .get_parsed_program_accounts(
                decode_stake_state,
                &solana_sdk::stake::program::id(),
                &withdrawer_filters(&owner),
                Some(MAX_STAKE_ACCOUNTS),
            )
            .await?;
        Ok(stake_element(&accounts).into_iter().collect())
    }
}

pub fn fetcher(loader: Arc<AccountLoader>) -> Fetcher {
    Fetcher::new(FETCHER_ID, NetworkId::Solana, NativeStakeExecutor { loader })
}
