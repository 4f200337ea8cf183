// Portfolio Data Model
//
// Networks, address systems, portfolio line items and the per-run reports the
// orchestrator assembles. Everything here is plain data: serializable,
// immutable once built, and free of I/O.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{PortfolioError, PortfolioResult};

/// Family of address encodings shared by several networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSystem {
    Solana,
    Evm,
    Bitcoin,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Solana,
    Ethereum,
    Polygon,
    Avalanche,
    Bitcoin,
    Aptos,
    Sui,
}

impl NetworkId {
    pub fn address_system(&self) -> AddressSystem {
        match self {
            NetworkId::Solana => AddressSystem::Solana,
            NetworkId::Ethereum | NetworkId::Polygon | NetworkId::Avalanche => AddressSystem::Evm,
            NetworkId::Bitcoin => AddressSystem::Bitcoin,
            NetworkId::Aptos | NetworkId::Sui => AddressSystem::Move,
        }
    }
}

/// Canonicalize an owner address for the given address system
pub fn format_address(address: &str, system: AddressSystem) -> PortfolioResult<String> {
    let trimmed = address.trim();
    let invalid = || PortfolioError::InvalidAddress(format!("{} ({:?})", address, system));

    match system {
        AddressSystem::Solana => Pubkey::from_str(trimmed)
            .map(|pk| pk.to_string())
            .map_err(|_| invalid()),
        AddressSystem::Evm => {
            let hex = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).ok_or_else(invalid)?;
            if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            Ok(format!("0x{}", hex.to_ascii_lowercase()))
        }
        AddressSystem::Move => {
            let hex = trimmed.strip_prefix("0x").ok_or_else(invalid)?;
            if hex.is_empty() || hex.len() > 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            Ok(format!("0x{:0>64}", hex.to_ascii_lowercase()))
        }
        AddressSystem::Bitcoin => {
            if trimmed.is_empty() {
                return Err(invalid());
            }
            Ok(trimmed.to_string())
        }
    }
}

pub fn format_address_by_network_id(address: &str, network_id: NetworkId) -> PortfolioResult<String> {
    format_address(address, network_id.address_system())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortfolioElementType {
    Single,
    Multiple,
    Liquidity,
    Borrowlend,
}

/// One priced (or unpriced) holding inside a portfolio element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAsset {
    pub address: Option<String>,
    pub amount: f64,
    pub price: Option<f64>,
    pub value: Option<f64>,
}

/// Portfolio line item produced by a fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioElement {
    #[serde(rename = "type")]
    pub element_type: PortfolioElementType,
    pub network_id: NetworkId,
    pub platform_id: String,
    pub label: String,
    pub value: Option<f64>,
    pub assets: Vec<PortfolioAsset>,
}

impl PortfolioElement {
    /// Same element with assets ordered by descending value, unpriced last
    pub fn sorted(mut self) -> Self {
        self.assets.sort_by(|a, b| match (a.value, b.value) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        self
    }
}

/// Sum of the present values; `None` when no element carries a value
pub fn usd_value_sum<'a>(values: impl IntoIterator<Item = &'a Option<f64>>) -> Option<f64> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Output of one fetcher for one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherResult {
    pub owner: String,
    pub fetcher_id: String,
    pub network_id: NetworkId,
    /// Milliseconds; 0 when served from the result cache
    pub duration: u64,
    pub elements: Vec<PortfolioElement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherReport {
    pub id: String,
    pub status: FetcherStatus,
    pub duration: Option<u64>,
    pub error: Option<String>,
}

impl FetcherReport {
    pub fn succeeded(id: impl Into<String>, duration: u64) -> Self {
        Self {
            id: id.into(),
            status: FetcherStatus::Succeeded,
            duration: Some(duration),
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: FetcherStatus::Failed,
            duration: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate of one run across many fetchers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchersResult {
    /// Unix milliseconds at completion
    pub date: i64,
    pub owner: String,
    pub address_system: AddressSystem,
    pub fetcher_reports: Vec<FetcherReport>,
    pub value: Option<f64>,
    pub elements: Vec<PortfolioElement>,
    pub duration: u64,
}
