//! In-memory caches
//!
//! These caches are volatile and cleared on restart.
//! Uses Moka for high-performance concurrent caching.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use super::models::Actor;

// =============================================================================
// Actor Cache
// =============================================================================

/// Actor cache in front of the `actors` table
///
/// Keyed by actor URI. Entries expire after the configured TTL so that
/// profile changes made without an `Update` eventually show up.
pub struct ActorCache {
    /// Actor URI -> Actor
    actors: Cache<String, Arc<Actor>>,
}

impl ActorCache {
    /// Create new actor cache
    ///
    /// # Arguments
    /// * `max_items` - Maximum number of actors to keep
    /// * `ttl` - Time to live of each entry
    pub fn new(max_items: u64, ttl: Duration) -> Self {
        let actors = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .build();

        Self { actors }
    }

    /// Get actor by URI
    pub async fn get(&self, id: &str) -> Option<Arc<Actor>> {
        let result = self.actors.get(id).await;

        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
        if result.is_some() {
            CACHE_HITS_TOTAL.with_label_values(&["actor"]).inc();
        } else {
            CACHE_MISSES_TOTAL.with_label_values(&["actor"]).inc();
        }

        result
    }

    /// Insert or replace actor
    pub async fn insert(&self, actor: Actor) {
        let id = actor.id.to_string();
        self.actors.insert(id, Arc::new(actor)).await;
    }

    /// Drop a cached actor, e.g. after its document changed
    pub async fn invalidate(&self, id: &str) {
        self.actors.invalidate(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor(id: &str) -> Actor {
        Actor::from_document(&json!({ "id": id, "type": "Person" }), false).unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_returns_actor() {
        let cache = ActorCache::new(10, Duration::from_secs(60));
        cache.insert(actor("https://remote.example/users/alice")).await;

        let cached = cache.get("https://remote.example/users/alice").await;
        assert_eq!(
            cached.map(|a| a.id.to_string()),
            Some("https://remote.example/users/alice".to_string())
        );
        assert!(cache.get("https://remote.example/users/bob").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = ActorCache::new(10, Duration::from_secs(60));
        cache.insert(actor("https://remote.example/users/alice")).await;
        cache.invalidate("https://remote.example/users/alice").await;

        assert!(cache.get("https://remote.example/users/alice").await.is_none());
    }
}
