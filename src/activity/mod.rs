pub mod request_context;
pub mod tracker;

pub use request_context::{RequestActivityContext, UserRequestActivity};
pub use tracker::{choose_rebuild_mode, ActivityTracker, RebuildDecision, RebuildMode};
