//! Usage event emission.
//!
//! Tracker failures never fail the request that triggered them; they are
//! logged and dropped.

use std::sync::Arc;

use climate_risk_config::TierLimits;
use climate_risk_engine_models::BulkBilling;
use climate_risk_models::SubscriptionTier;
use climate_risk_store::{UsageEvent, UsageKind, UsageTracker};
use uuid::Uuid;

use crate::clock::Clock;

/// Emits usage events to a [`UsageTracker`].
pub struct UsageRecorder {
    tracker: Arc<dyn UsageTracker>,
    clock: Arc<dyn Clock>,
}

impl UsageRecorder {
    /// Creates a recorder.
    #[must_use]
    pub fn new(tracker: Arc<dyn UsageTracker>, clock: Arc<dyn Clock>) -> Self {
        Self { tracker, clock }
    }

    /// Emits one usage event, logging and swallowing tracker errors.
    pub async fn record(
        &self,
        kind: UsageKind,
        tier: Option<SubscriptionTier>,
        properties: usize,
        cost: f64,
    ) {
        let event = UsageEvent {
            id: Uuid::new_v4(),
            kind,
            tier,
            properties,
            cost,
            occurred_at: self.clock.now(),
        };

        if let Err(e) = self.tracker.track(event).await {
            log::warn!(
                "Failed to record {kind} usage ({properties} properties, cost {cost:.2}): {e}"
            );
        }
    }
}

/// Bills a bulk request: tier base cost plus per-property cost for each
/// success. Failed addresses are never billed.
#[must_use]
pub fn bulk_billing(tier: SubscriptionTier, limits: &TierLimits, successes: usize) -> BulkBilling {
    BulkBilling {
        tier,
        billable_properties: successes,
        cost: limits.bulk_cost(successes),
    }
}
