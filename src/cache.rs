//! Conference cache (spec §6): a shared key-value store keyed
//! `<workspaceId>_<confName>`, each entry holding the conference's bridge
//! id and cached user info. The Redis cache behind it is an external
//! collaborator (spec §1) specified only by this interface; this module
//! supplies the trait `ConferenceCache` consumed by `cells::conference`
//! plus an in-process `DashMap`-backed implementation used where no
//! external cache is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceCacheEntry {
    pub id: Uuid,
    #[serde(rename = "bridgeId")]
    pub bridge_id: String,
    #[serde(rename = "userInfo")]
    pub user_info: serde_json::Value,
}

#[async_trait]
pub trait ConferenceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ConferenceCacheEntry>>;
    async fn set(&self, key: &str, entry: ConferenceCacheEntry) -> Result<()>;
}

/// Cache key for a workspace/conference-name pair (spec §4.E
/// ConferenceModel, §6).
pub fn cache_key(workspace_id: i64, conf_name: &str) -> String {
    format!("{workspace_id}_{conf_name}")
}

#[derive(Default)]
pub struct InMemoryConferenceCache {
    entries: DashMap<String, ConferenceCacheEntry>,
}

impl InMemoryConferenceCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConferenceCache for InMemoryConferenceCache {
    async fn get(&self, key: &str) -> Result<Option<ConferenceCacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn set(&self, key: &str, entry: ConferenceCacheEntry) -> Result<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_entry() {
        let cache = InMemoryConferenceCache::new();
        let key = cache_key(7, "weekly-standup");
        let entry = ConferenceCacheEntry {
            id: Uuid::new_v4(),
            bridge_id: "bridge-1".to_string(),
            user_info: serde_json::json!({ "ok": true }),
        };
        cache.set(&key, entry.clone()).await.unwrap();
        let got = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(got.bridge_id, entry.bridge_id);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = InMemoryConferenceCache::new();
        assert!(cache.get("no_such_key").await.unwrap().is_none());
    }
}
