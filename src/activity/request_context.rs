// Per-request activity snapshot
//
// Filled once at the start of an aggregation run by the prefetch, then read
// by every program-account loader during that run. Entries are keyed by
// owner. The last owner written is remembered so loaders that cannot extract
// an owner from their filters can still find the run's wallet.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRequestActivity {
    pub owner: String,
    /// Programs invoked by owner-signed transactions newer than the stored cursor
    pub touched_programs: HashSet<String>,
    pub last_seen_signature: Option<String>,
    pub last_seen_slot: Option<u64>,
    /// Unix ms
    pub created_at: i64,
}

#[derive(Default)]
pub struct RequestActivityContext {
    entries: DashMap<String, Arc<UserRequestActivity>>,
    last_owner: RwLock<Option<String>>,
}

impl RequestActivityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_request_activity(&self, activity: UserRequestActivity) {
        let owner = activity.owner.clone();
        self.entries.insert(owner.clone(), Arc::new(activity));
        *self.last_owner.write() = Some(owner);
    }

    pub fn get_request_activity(&self, owner: &str) -> Option<Arc<UserRequestActivity>> {
        self.entries.get(owner).map(|entry| entry.value().clone())
    }

    pub fn program_touched_in_request(&self, owner: &str, program_id: &str) -> bool {
        self.get_request_activity(owner)
            .map(|activity| activity.touched_programs.contains(program_id))
            .unwrap_or(false)
    }

    /// Most recently written entry, or any entry if that one has been cleared
    pub fn get_any_request_activity(&self) -> Option<Arc<UserRequestActivity>> {
        let last_owner = self.last_owner.read().clone();
        if let Some(activity) = last_owner.and_then(|owner| self.get_request_activity(&owner)) {
            return Some(activity);
        }
        self.entries.iter().next().map(|entry| entry.value().clone())
    }

    pub fn clear_request_activity(&self, owner: &str) {
        self.entries.remove(owner);
        let mut last_owner = self.last_owner.write();
        if last_owner.as_deref() == Some(owner) {
            *last_owner = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
