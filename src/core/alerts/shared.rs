// Lock-owning handle around the alert engine, shared by the polling task and
// the foreground context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::engine::AlertEngine;
use super::model::AlertEvent;
use crate::core::model::{AssetId, BoundKind, WatchedAsset};

/// Cloneable handle; every clone guards the same engine with the same lock.
#[derive(Debug, Clone, Default)]
pub struct SharedAlerts {
    inner: Arc<Mutex<AlertEngine>>,
}

impl SharedAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AlertEngine> {
        // The map is updated in single statements, so a poisoned lock still holds a
        // consistent map.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn evaluate(&self, asset: &WatchedAsset, current_price: Option<f64>) -> Vec<AlertEvent> {
        self.lock().evaluate(asset, current_price)
    }

    pub fn clear_all(&self, id: AssetId) -> usize {
        self.lock().clear_all(id)
    }

    pub fn on_threshold_changed(&self, id: AssetId, bound: BoundKind, old_value: f64) -> bool {
        self.lock().on_threshold_changed(id, bound, old_value)
    }

    pub fn remove(&self, id: AssetId) -> usize {
        self.lock().remove(id)
    }

    pub fn triggered_count(&self) -> usize {
        self.lock().triggered_count()
    }

    pub fn entries_for(&self, id: AssetId) -> usize {
        self.lock().entries_for(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clones_share_state() {
        let alerts = SharedAlerts::new();
        let other = alerts.clone();
        let asset = WatchedAsset::new("BTC", AssetId(1))
            .with_above(100.0)
            .with_alerts(true);

        assert_eq!(alerts.evaluate(&asset, Some(110.0)).len(), 1);
        assert_eq!(other.triggered_count(), 1);

        other.remove(AssetId(1));
        assert_eq!(alerts.entries_for(AssetId(1)), 0);
    }

    #[test]
    fn test_concurrent_evaluate_fires_once() {
        let alerts = SharedAlerts::new();
        let asset = WatchedAsset::new("ETH", AssetId(1027))
            .with_above(3000.0)
            .with_alerts(true);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alerts = alerts.clone();
                let asset = asset.clone();
                thread::spawn(move || alerts.evaluate(&asset, Some(3100.0)).len())
            })
            .collect();

        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fired, 1);
    }
}
