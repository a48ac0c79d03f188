use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::PublicProfile;
use crate::state::ChatStore;

/// Read-through cache of public author profiles, consulted on every message
/// hydration so broadcasts do not hit the user store per message.
#[derive(Clone)]
pub struct ProfileCache {
    cache: Cache<Uuid, PublicProfile>,
}

impl ProfileCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Fetch a profile through the cache. Unknown users are not cached, so a
    /// late mirror sync becomes visible on the next lookup.
    pub async fn get_or_load(
        &self,
        store: &dyn ChatStore,
        user_id: Uuid,
    ) -> Result<Option<PublicProfile>> {
        if let Some(profile) = self.cache.get(&user_id).await {
            return Ok(Some(profile));
        }

        match store.get_user(&user_id).await? {
            Some(user) => {
                let profile = user.public_profile();
                self.cache.insert(user_id, profile.clone()).await;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Drop a cached profile, e.g. after the mirrored record changed
    pub async fn invalidate(&self, user_id: &Uuid) {
        self.cache.invalidate(user_id).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(300))
    }
}
