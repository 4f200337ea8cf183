// Feature: Solana JSON-RPC Chain Client
//
// Thin shim over the nonblocking `RpcClient`. It does no retrying or
// throttling of its own; that lives in `RpcGuard`. Its jobs are request
// shaping, mapping transport failures onto `ChainErrorKind`, and the optional
// per-method request log.

use async_trait::async_trait;
use dashmap::DashMap;
use solana_account_decoder::{UiAccountEncoding, UiDataSliceConfig};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig},
    rpc_request::RpcError,
};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction,
    UiInstruction, UiMessage, UiParsedInstruction, UiTransactionEncoding,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::client::{ChainClient, KeyedAccount, ParsedTransaction, ProgramAccountsQuery, SignatureInfo, SignatureQuery};
use crate::error::{ChainError, ChainErrorKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_LOG_EVERY: u64 = 5;

/// Per-method request counters, summarized to the log every few calls
#[derive(Default)]
pub struct RequestLog {
    counts: DashMap<&'static str, u64>,
    total: AtomicU64,
}

impl RequestLog {
    pub fn record(&self, method: &'static str) {
        *self.counts.entry(method).or_insert(0) += 1;
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        if total % REQUEST_LOG_EVERY == 0 {
            let mut summary: Vec<(&'static str, u64)> = self.counts.iter().map(|e| (*e.key(), *e.value())).collect();
            summary.sort_by(|a, b| b.1.cmp(&a.1));
            info!("RPC requests: total={} by_method={:?}", total, summary);
        }
    }

    pub fn count(&self, method: &str) -> u64 {
        self.counts.get(method).map(|c| *c).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

pub struct RpcChainClient {
    client: RpcClient,
    commitment: CommitmentConfig,
    request_log: Option<RequestLog>,
}

impl RpcChainClient {
    pub fn new(url: &str, log_requests: bool) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            client: RpcClient::new_with_timeout_and_commitment(url.to_string(), REQUEST_TIMEOUT, commitment),
            commitment,
            request_log: log_requests.then(RequestLog::default),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    pub fn request_log(&self) -> Option<&RequestLog> {
        self.request_log.as_ref()
    }

    fn track(&self, method: &'static str) {
        if let Some(log) = &self.request_log {
            log.record(method);
        }
        #[cfg(feature = "metrics")]
        crate::metrics::record_rpc_request(method);
    }
}

/// Map a client failure onto the retry classification
pub fn classify_client_error(err: &ClientError) -> ChainErrorKind {
    match err.kind() {
        ClientErrorKind::Reqwest(e) => {
            if let Some(status) = e.status() {
                return classify_status(status.as_u16());
            }
            if e.is_timeout() {
                ChainErrorKind::Timeout
            } else if e.is_connect() || e.is_request() {
                ChainErrorKind::ConnectionReset
            } else {
                ChainErrorKind::Other
            }
        }
        ClientErrorKind::Io(e) => match e.kind() {
            std::io::ErrorKind::TimedOut => ChainErrorKind::Timeout,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => ChainErrorKind::ConnectionReset,
            _ => ChainErrorKind::Other,
        },
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => match *code {
            429 | -32429 => ChainErrorKind::RateLimited,
            code if (502..=504).contains(&code) => ChainErrorKind::Gateway,
            _ => ChainErrorKind::Other,
        },
        ClientErrorKind::RpcError(RpcError::RpcRequestError(message)) => classify_message(message),
        _ => ChainErrorKind::Other,
    }
}

fn classify_status(status: u16) -> ChainErrorKind {
    match status {
        429 => ChainErrorKind::RateLimited,
        408 => ChainErrorKind::Timeout,
        502..=504 => ChainErrorKind::Gateway,
        404 => ChainErrorKind::NotFound,
        _ => ChainErrorKind::Other,
    }
}

// Some providers report throttling only in the error text
fn classify_message(message: &str) -> ChainErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        ChainErrorKind::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ChainErrorKind::Timeout
    } else if lower.contains("connection reset") || lower.contains("econnreset") {
        ChainErrorKind::ConnectionReset
    } else if ["502", "503", "504"].iter().any(|code| lower.contains(code)) {
        ChainErrorKind::Gateway
    } else {
        ChainErrorKind::Other
    }
}

fn to_chain_error(err: ClientError) -> ChainError {
    ChainError::new(classify_client_error(&err), err.to_string())
}

fn parse_signature(raw: &str) -> Result<Signature, ChainError> {
    Signature::from_str(raw).map_err(|e| ChainError::other(format!("Invalid signature {}: {}", raw, e)))
}

fn instruction_program_id(instruction: &UiInstruction, account_keys: &[String]) -> Option<String> {
    match instruction {
        UiInstruction::Compiled(ix) => account_keys.get(ix.program_id_index as usize).cloned(),
        UiInstruction::Parsed(UiParsedInstruction::Parsed(ix)) => Some(ix.program_id.clone()),
        UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(ix)) => Some(ix.program_id.clone()),
    }
}

/// Flatten a jsonParsed transaction into signers and invoked program ids
pub fn to_parsed_transaction(signature: &str, tx: &EncodedConfirmedTransactionWithStatusMeta) -> ParsedTransaction {
    let mut parsed = ParsedTransaction {
        signature: signature.to_string(),
        slot: tx.slot,
        ..Default::default()
    };

    let EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction else {
        return parsed;
    };

    let account_keys: Vec<String> = match &ui_tx.message {
        UiMessage::Parsed(message) => {
            parsed.signers = message
                .account_keys
                .iter()
                .filter(|key| key.signer)
                .map(|key| key.pubkey.clone())
                .collect();
            parsed.program_ids = message
                .instructions
                .iter()
                .filter_map(|ix| instruction_program_id(ix, &[]))
                .collect();
            message.account_keys.iter().map(|key| key.pubkey.clone()).collect()
        }
        UiMessage::Raw(message) => {
            let signer_count = message.header.num_required_signatures as usize;
            parsed.signers = message.account_keys.iter().take(signer_count).cloned().collect();
            parsed.program_ids = message
                .instructions
                .iter()
                .filter_map(|ix| message.account_keys.get(ix.program_id_index as usize).cloned())
                .collect();
            message.account_keys.clone()
        }
    };

    if let Some(meta) = &tx.transaction.meta {
        if let OptionSerializer::Some(inner) = &meta.inner_instructions {
            parsed.inner_program_ids = inner
                .iter()
                .flat_map(|set| set.instructions.iter())
                .filter_map(|ix| instruction_program_id(ix, &account_keys))
                .collect();
        }
    }

    parsed
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, ChainError> {
        self.track("getAccountInfo");
        self.client
            .get_account_with_commitment(pubkey, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(to_chain_error)
    }

    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Account>>, ChainError> {
        if pubkeys.is_empty() {
            return Ok(Vec::new());
        }
        self.track("getMultipleAccounts");
        self.client
            .get_multiple_accounts_with_commitment(pubkeys, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(to_chain_error)
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        query: &ProgramAccountsQuery,
    ) -> Result<Vec<KeyedAccount>, ChainError> {
        self.track("getProgramAccounts");
        let config = RpcProgramAccountsConfig {
            filters: (!query.filters.is_empty()).then(|| query.filters.clone()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                data_slice: query.data_slice.map(|slice| UiDataSliceConfig {
                    offset: slice.offset,
                    length: slice.length,
                }),
                commitment: Some(self.commitment),
                min_context_slot: None,
            },
            ..Default::default()
        };
        let accounts = self
            .client
            .get_program_accounts_with_config(program_id, config)
            .await
            .map_err(to_chain_error)?;
        Ok(accounts
            .into_iter()
            .map(|(pubkey, account)| KeyedAccount { pubkey, account })
            .collect())
    }

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        query: &SignatureQuery,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        self.track("getSignaturesForAddress");
        let config = GetConfirmedSignaturesForAddress2Config {
            before: query.before.as_deref().map(parse_signature).transpose()?,
            until: query.until.as_deref().map(parse_signature).transpose()?,
            limit: Some(query.limit),
            commitment: Some(self.commitment),
        };
        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(to_chain_error)?;
        Ok(statuses
            .into_iter()
            .map(|status| SignatureInfo {
                signature: status.signature,
                slot: status.slot,
                block_time: status.block_time,
            })
            .collect())
    }

    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError> {
        self.track("getTransaction");
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        match self
            .client
            .get_transaction_with_config(&parse_signature(signature)?, config)
            .await
        {
            Ok(tx) => Ok(Some(to_parsed_transaction(signature, &tx))),
            // A null result fails deserialization; the node does not have it
            Err(err) if matches!(err.kind(), ClientErrorKind::SerdeJson(_)) => {
                debug!("Transaction {} not found", signature);
                Ok(None)
            }
            Err(err) => Err(to_chain_error(err)),
        }
    }
}
