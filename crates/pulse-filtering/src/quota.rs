//! Document quotas for live-viewer streams.
//!
//! Each stream may forward only a bounded number of documents per telemetry
//! kind. Quota accrues continuously at `max / 60` documents per second,
//! capped at `max`, and starts at the configured initial amount.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_types::TelemetryKind;

use crate::clock::Clock;
use crate::config::QuotaConfig;

#[derive(Debug)]
struct QuotaState {
    available: f64,
    last_update: DateTime<Utc>,
}

/// A single replenishing quota.
#[derive(Debug)]
pub struct QuotaTracker {
    max_quota: f64,
    per_second: f64,
    state: Mutex<QuotaState>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(config: &QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        let max_quota = f64::from(config.max_documents_per_minute);
        let initial = f64::from(config.initial_documents).min(max_quota);
        Self {
            max_quota,
            per_second: max_quota / 60.0,
            state: Mutex::new(QuotaState {
                available: initial,
                last_update: clock.now(),
            }),
            clock,
        }
    }

    /// Take one document's worth of quota, if available.
    pub fn try_consume(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.replenish(&mut state, now);
        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Quota currently available, after replenishment.
    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.replenish(&mut state, now);
        state.available
    }

    fn replenish(&self, state: &mut QuotaState, now: DateTime<Utc>) {
        let elapsed = (now - state.last_update)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        if elapsed <= 0 {
            return;
        }
        let accrued = elapsed as f64 / 1_000_000.0 * self.per_second;
        state.available = (state.available + accrued).min(self.max_quota);
        state.last_update = now;
    }
}

/// One [`QuotaTracker`] per telemetry kind.
#[derive(Debug)]
pub struct StreamQuotas {
    trackers: HashMap<TelemetryKind, QuotaTracker>,
}

impl StreamQuotas {
    pub fn new(config: &QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        let trackers = TelemetryKind::ALL
            .into_iter()
            .map(|kind| (kind, QuotaTracker::new(config, clock.clone())))
            .collect();
        Self { trackers }
    }

    pub fn try_consume(&self, kind: TelemetryKind) -> bool {
        self.trackers
            .get(&kind)
            .map(QuotaTracker::try_consume)
            .unwrap_or(false)
    }
}
