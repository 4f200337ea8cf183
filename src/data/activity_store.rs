// Activity Cache Store
//
// Typed wrappers over the shared `Cache` for the three persisted record kinds:
// - per (program, user): discovered account keys + activity cursor
// - per user: last time a portfolio was computed
// - per user: global activity cursor (newest signature seen)
//
// Writes are unconditional overwrites. Every record is derived data, so
// last-writer-wins across concurrent requests is fine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ActivitySettings;
use crate::data::cache::Cache;
use crate::error::StoreError;
use crate::utils::now_ms;

const PROGRAM_USER_PREFIX: &str = "program-user-pdas";
const USER_LAST_COMPUTED_PREFIX: &str = "user-last-computed";
const USER_ACTIVITY_CURSOR_PREFIX: &str = "user-activity-cursor";

/// Cursor for one (program, user) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramUserActivity {
    pub last_seen_signature: Option<String>,
    pub last_seen_slot: Option<u64>,
    /// Unix ms of the last rebuild; account keys are trustworthy as of this instant
    pub last_rebuilt_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramUserCache {
    pub account_pubkeys: Vec<String>,
    pub activity: ProgramUserActivity,
}

/// Wallet-wide cursor, independent of any program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityCursor {
    pub last_seen_signature: Option<String>,
    pub last_seen_slot: Option<u64>,
    /// Unix seconds, as reported by the chain
    pub last_seen_block_time: Option<i64>,
}

#[derive(Clone)]
pub struct ActivityStore {
    cache: Cache,
    settings: ActivitySettings,
}

impl ActivityStore {
    pub fn new(cache: Cache, settings: ActivitySettings) -> Self {
        Self { cache, settings }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn program_user_key(program_id: &str, user: &str) -> String {
        format!("{}:{}", program_id, user)
    }

    fn standard_ttl(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.settings.program_cache_ttl_ms))
    }

    pub async fn get_program_user_cache(
        &self,
        program_id: &str,
        user: &str,
    ) -> Result<Option<ProgramUserCache>, StoreError> {
        self.cache
            .get_item(&Self::program_user_key(program_id, user), PROGRAM_USER_PREFIX)
            .await
    }

    pub async fn set_program_user_cache(
        &self,
        program_id: &str,
        user: &str,
        value: &ProgramUserCache,
    ) -> Result<(), StoreError> {
        self.cache
            .set_item(
                &Self::program_user_key(program_id, user),
                value,
                PROGRAM_USER_PREFIX,
                self.standard_ttl(),
            )
            .await
    }

    /// Rewrite the cached record with the long TTL. Returns false if nothing is cached.
    pub async fn extend_program_user_cache_ttl(&self, program_id: &str, user: &str) -> Result<bool, StoreError> {
        let key = Self::program_user_key(program_id, user);
        let Some(existing) = self
            .cache
            .get_item::<ProgramUserCache>(&key, PROGRAM_USER_PREFIX)
            .await?
        else {
            return Ok(false);
        };
        self.cache
            .set_item(
                &key,
                &existing,
                PROGRAM_USER_PREFIX,
                Some(Duration::from_millis(self.settings.program_cache_long_ttl_ms)),
            )
            .await?;
        Ok(true)
    }

    /// Extend the record's TTL when the wallet has been dormant longer than the threshold
    pub async fn maybe_extend_program_user_cache_ttl(
        &self,
        program_id: &str,
        user: &str,
        cursor: &UserActivityCursor,
    ) -> Result<bool, StoreError> {
        let Some(block_time) = cursor.last_seen_block_time.filter(|t| *t > 0) else {
            return Ok(false);
        };
        let idle_ms = now_ms() - block_time * 1000;
        if idle_ms <= self.settings.dormancy_threshold_ms as i64 {
            return Ok(false);
        }
        debug!(
            "Wallet {} dormant for {}ms, extending {} cache TTL",
            user, idle_ms, program_id
        );
        self.extend_program_user_cache_ttl(program_id, user).await
    }

    pub async fn set_user_last_computed(&self, user: &str, timestamp_ms: i64) -> Result<(), StoreError> {
        self.cache
            .set_item(user, &timestamp_ms, USER_LAST_COMPUTED_PREFIX, self.standard_ttl())
            .await
    }

    pub async fn get_user_last_computed(&self, user: &str) -> Result<Option<i64>, StoreError> {
        self.cache.get_item(user, USER_LAST_COMPUTED_PREFIX).await
    }

    pub async fn get_user_activity_cursor(&self, user: &str) -> Result<Option<UserActivityCursor>, StoreError> {
        self.cache.get_item(user, USER_ACTIVITY_CURSOR_PREFIX).await
    }

    pub async fn set_user_activity_cursor(&self, user: &str, cursor: &UserActivityCursor) -> Result<(), StoreError> {
        self.cache
            .set_item(user, cursor, USER_ACTIVITY_CURSOR_PREFIX, self.standard_ttl())
            .await
    }
}
