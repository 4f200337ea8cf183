pub mod accounts;
pub mod client;
pub mod guard;
pub mod rpc;

pub use accounts::{owner_from_filters, AccountLoader, ParsedAccount};
pub use client::{
    ChainClient, DataSlice, KeyedAccount, ParsedTransaction, ProgramAccountsQuery, SignatureInfo, SignatureQuery,
};
pub use guard::{scan_memo_key, RpcGuard};
pub use rpc::{RpcChainClient, RequestLog};
