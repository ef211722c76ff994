// Alert engine - turns a price stream into debounced threshold alerts.

use std::collections::HashMap;

use chrono::Utc;

use super::model::{AlertEvent, AlertKey, TriggerState};
use super::triggers::{check_bound, BoundCheck};
use crate::core::model::{AssetId, BoundKind, WatchedAsset};

/// Per-key trigger state for every watched asset.
///
/// A key that is absent or `Armed` fires on the next crossing; a `Triggered`
/// key stays silent until the price returns inside the band.
#[derive(Debug, Default)]
pub struct AlertEngine {
    states: HashMap<AlertKey, TriggerState>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one price sample for one asset.
    /// Returns the alert events that fired (zero, one, or one per bound).
    pub fn evaluate(&mut self, asset: &WatchedAsset, current_price: Option<f64>) -> Vec<AlertEvent> {
        let mut alerts = Vec::new();

        // Inactive alerts leave existing state alone; clearing is an explicit call.
        if !asset.alert_active {
            return alerts;
        }
        let Some(id) = asset.id else {
            return alerts;
        };
        let Some(price) = current_price else {
            return alerts;
        };
        if !price.is_finite() {
            log::debug!("Ignoring non-finite price {} for {}", price, asset.symbol);
            return alerts;
        }

        for bound in BoundKind::all() {
            let Some(threshold) = asset.threshold(*bound) else {
                continue;
            };
            let key = AlertKey::new(id, *bound, threshold);

            match check_bound(*bound, threshold, price) {
                BoundCheck::Breached => {
                    let already_fired = self.states.get(&key).is_some_and(TriggerState::is_triggered);
                    if already_fired {
                        continue;
                    }
                    self.states.insert(
                        key,
                        TriggerState::Triggered {
                            at: Utc::now(),
                            price,
                        },
                    );
                    let event = AlertEvent::new(id, &asset.symbol, *bound, threshold, price);
                    log::info!("ALERT: {}", event.message);
                    alerts.push(event);
                }
                BoundCheck::Inside => {
                    if let Some(state) = self.states.get_mut(&key) {
                        if let TriggerState::Triggered { at, price: fired_price } = *state {
                            *state = TriggerState::Armed;
                            log::debug!(
                                "Alert {} re-armed at price {} (fired at {} on {})",
                                key,
                                price,
                                fired_price,
                                at.format("%H:%M:%S")
                            );
                        }
                    }
                }
            }
        }

        alerts
    }

    /// Drop every state entry for `id`. Called when alerts are switched off
    /// so that switching them back on can fire again.
    pub fn clear_all(&mut self, id: AssetId) -> usize {
        let before = self.states.len();
        self.states.retain(|key, _| key.id != id);
        let removed = before - self.states.len();
        if removed > 0 {
            log::debug!("Cleared {} alert state entries for asset {}", removed, id);
        }
        removed
    }

    /// Forget the entry keyed by a threshold that has just been replaced.
    pub fn on_threshold_changed(&mut self, id: AssetId, bound: BoundKind, old_value: f64) -> bool {
        let key = AlertKey::new(id, bound, old_value);
        let removed = self.states.remove(&key).is_some();
        if removed {
            log::debug!("Alert state reset for {}", key);
        }
        removed
    }

    /// Forget an un-watched asset entirely.
    pub fn remove(&mut self, id: AssetId) -> usize {
        self.clear_all(id)
    }

    pub fn state(&self, key: &AlertKey) -> Option<TriggerState> {
        self.states.get(key).copied()
    }

    /// Number of alerts currently fired and waiting for a reset.
    pub fn triggered_count(&self) -> usize {
        self.states.values().filter(|s| s.is_triggered()).count()
    }

    /// Number of state entries (armed or triggered) held for `id`.
    pub fn entries_for(&self, id: AssetId) -> usize {
        self.states.keys().filter(|key| key.id == id).count()
    }
}
