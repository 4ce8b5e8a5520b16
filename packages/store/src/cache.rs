//! In-process regional cache.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{RegionalCache, StoreError};

struct Slot {
    value: serde_json::Value,
    expires_at: Instant,
}

/// [`RegionalCache`] backed by a map. Expired entries are evicted on read
/// and swept on every write.
#[derive(Default)]
pub struct MemoryRegionalCache {
    entries: Mutex<BTreeMap<String, Slot>>,
}

impl std::fmt::Debug for MemoryRegionalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.lock().map_or(0, |e| e.len());
        f.debug_struct("MemoryRegionalCache")
            .field("entries", &len)
            .finish()
    }
}

impl MemoryRegionalCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |e| e.len())
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RegionalCache for MemoryRegionalCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut entries = self.entries.lock()?;
        let Some(slot) = entries.get(key) else {
            return Ok(None);
        };
        if slot.expires_at > Instant::now() {
            return Ok(Some(slot.value.clone()));
        }

        log::debug!("Regional cache entry '{key}' expired");
        entries.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock()?;

        let before = entries.len();
        entries.retain(|_, slot| slot.expires_at > now);
        let swept = before - entries.len();
        if swept > 0 {
            log::debug!("Swept {swept} expired regional cache entries");
        }

        entries.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}
