//! Monitor registry: tracking configuration and subscriber refcounts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use caissa_models::{Monitor, MonitorOptions, MonitorStatus, Thresholds};

/// Per-player monitors plus explicit per-entity subscriber counts.
///
/// The refcounts drive demand-driven teardown: `monitor:subscribe` retains an
/// entity, `monitor:unsubscribe` releases it, and the monitor is removed only
/// when the count returns to zero. Client metadata is never consulted.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    monitors: HashMap<String, Monitor>,
    refcounts: HashMap<String, usize>,
    defaults: Thresholds,
}

impl MonitorRegistry {
    pub fn new(defaults: Thresholds) -> Self {
        Self {
            monitors: HashMap::new(),
            refcounts: HashMap::new(),
            defaults,
        }
    }

    /// Insert a monitor for an entity. Returns `true` when newly created;
    /// re-adding an existing monitor refreshes options and reactivates it.
    pub fn insert(&mut self, entity_id: &str, opts: &MonitorOptions) -> bool {
        match self.monitors.get_mut(entity_id) {
            Some(existing) => {
                existing.thresholds = opts.thresholds.merge_over(self.defaults);
                if let Some(enabled) = opts.alerts_enabled {
                    existing.config.alerts_enabled = enabled;
                }
                existing.status = MonitorStatus::Active;
                false
            }
            None => {
                self.monitors
                    .insert(entity_id.to_string(), Monitor::new(entity_id, opts, self.defaults));
                true
            }
        }
    }

    /// Remove a monitor. The entity's stream is untouched.
    pub fn remove(&mut self, entity_id: &str) -> bool {
        self.monitors.remove(entity_id).is_some()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Monitor> {
        self.monitors.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.monitors.contains_key(entity_id)
    }

    /// Ids of all active monitors, sorted for deterministic cycle order.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .monitors
            .values()
            .filter(|m| m.status == MonitorStatus::Active)
            .map(|m| m.entity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of all monitors regardless of status.
    pub fn entity_ids(&self) -> Vec<String> {
        self.monitors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn thresholds_for(&self, entity_id: &str) -> Thresholds {
        self.monitors
            .get(entity_id)
            .map(|m| m.thresholds)
            .unwrap_or(self.defaults)
    }

    pub fn set_last_check(&mut self, entity_id: &str, ts: DateTime<Utc>) {
        if let Some(monitor) = self.monitors.get_mut(entity_id) {
            monitor.last_check = Some(ts);
        }
    }

    /// Bump the subscriber count for an entity.
    pub fn retain_entity(&mut self, entity_id: &str) {
        *self.refcounts.entry(entity_id.to_string()).or_insert(0) += 1;
    }

    /// Drop one subscriber reference. Returns the remaining count.
    pub fn release_entity(&mut self, entity_id: &str) -> usize {
        match self.refcounts.get_mut(entity_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let remaining = *count;
                if remaining == 0 {
                    self.refcounts.remove(entity_id);
                }
                remaining
            }
            None => 0,
        }
    }

    pub fn subscriber_count(&self, entity_id: &str) -> usize {
        self.refcounts.get(entity_id).copied().unwrap_or(0)
    }
}
