pub mod activity_store;
pub mod cache;
pub mod portfolio;

pub use activity_store::{ActivityStore, ProgramUserActivity, ProgramUserCache, UserActivityCursor};
pub use cache::{Cache, KeyValueStore, MemoryStore};
pub use portfolio::{
    format_address, format_address_by_network_id, usd_value_sum, AddressSystem, FetcherReport, FetcherResult,
    FetcherStatus, FetchersResult, NetworkId, PortfolioAsset, PortfolioElement, PortfolioElementType,
};
