//! Usage trackers.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{StoreError, UsageEvent, UsageTracker};

/// Writes each usage event to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsageTracker;

#[async_trait]
impl UsageTracker for LogUsageTracker {
    async fn track(&self, event: UsageEvent) -> Result<(), StoreError> {
        log::info!(
            "usage: {} tier={} properties={} cost={:.2}",
            event.kind,
            event
                .tier
                .map_or_else(|| "-".to_string(), |t| t.to_string()),
            event.properties,
            event.cost,
        );
        Ok(())
    }
}

/// Keeps every usage event in memory for later inspection.
#[derive(Debug, Default)]
pub struct RecordingUsageTracker {
    events: Mutex<Vec<UsageEvent>>,
}

impl RecordingUsageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock was poisoned.
    pub fn events(&self) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self.events.lock()?.clone())
    }
}

#[async_trait]
impl UsageTracker for RecordingUsageTracker {
    async fn track(&self, event: UsageEvent) -> Result<(), StoreError> {
        self.events.lock()?.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::UsageKind;

    #[tokio::test]
    async fn records_in_order() {
        let tracker = RecordingUsageTracker::new();
        for kind in [UsageKind::SingleLookup, UsageKind::RadiusSearch] {
            tracker
                .track(UsageEvent {
                    id: Uuid::new_v4(),
                    kind,
                    tier: None,
                    properties: 1,
                    cost: 0.05,
                    occurred_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let kinds = tracker
            .events()
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![UsageKind::SingleLookup, UsageKind::RadiusSearch]);
    }
}
