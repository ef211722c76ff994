// Watch-list state shared between the foreground and the polling task.
// Every edit that changes what an alert key means also resets the matching
// alert state, so a re-configured alert can fire again.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::alerts::SharedAlerts;
use super::error::WatchListError;
use super::model::{AssetId, BoundKind, WatchedAsset};
use super::scheduler::WatchListProvider;

#[derive(Debug, Clone)]
pub struct WatchList {
    assets: Arc<RwLock<Vec<WatchedAsset>>>,
    alerts: SharedAlerts,
}

impl WatchList {
    pub fn new(assets: Vec<WatchedAsset>, alerts: SharedAlerts) -> Self {
        Self {
            assets: Arc::new(RwLock::new(assets)),
            alerts,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<WatchedAsset>> {
        self.assets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<WatchedAsset>> {
        self.assets.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<WatchedAsset> {
        self.read().clone()
    }

    /// Provider handed to the scheduler; reads the live list on every call.
    pub fn provider(&self) -> WatchListProvider {
        let list = self.clone();
        Arc::new(move || list.snapshot())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn find_by_symbol(&self, symbol: &str) -> Option<WatchedAsset> {
        self.read()
            .iter()
            .find(|a| a.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
    }

    pub fn add(&self, asset: WatchedAsset) -> Result<(), WatchListError> {
        let Some(id) = asset.id else {
            return Err(WatchListError::Unresolved(asset.symbol));
        };

        let mut assets = self.write();
        if assets.iter().any(|a| a.symbol.eq_ignore_ascii_case(&asset.symbol)) {
            return Err(WatchListError::DuplicateSymbol(asset.symbol));
        }
        if assets.iter().any(|a| a.id == Some(id)) {
            return Err(WatchListError::DuplicateId(id));
        }

        log::info!("Watching {} ({})", asset.symbol, id);
        assets.push(asset);
        Ok(())
    }

    /// Drop the asset and forget all of its alert state.
    pub fn remove(&self, id: AssetId) -> Option<WatchedAsset> {
        let removed = {
            let mut assets = self.write();
            let pos = assets.iter().position(|a| a.id == Some(id))?;
            assets.remove(pos)
        };
        let cleared = self.alerts.remove(id);
        log::info!("Stopped watching {} ({}), cleared {} alert states", removed.symbol, id, cleared);
        Some(removed)
    }

    /// Set or clear one threshold. Returns false if `id` is not watched.
    pub fn set_threshold(&self, id: AssetId, bound: BoundKind, value: Option<f64>) -> bool {
        let old = {
            let mut assets = self.write();
            let Some(asset) = assets.iter_mut().find(|a| a.id == Some(id)) else {
                return false;
            };
            let slot = match bound {
                BoundKind::Above => &mut asset.alert_above,
                BoundKind::Below => &mut asset.alert_below,
            };
            std::mem::replace(slot, value)
        };

        if let Some(old) = old {
            if value != Some(old) {
                self.alerts.on_threshold_changed(id, bound, old);
            }
        }
        true
    }

    /// Returns false if `id` is not watched.
    pub fn set_alert_active(&self, id: AssetId, active: bool) -> bool {
        {
            let mut assets = self.write();
            let Some(asset) = assets.iter_mut().find(|a| a.id == Some(id)) else {
                return false;
            };
            asset.alert_active = active;
        }

        if !active {
            self.alerts.clear_all(id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> WatchedAsset {
        WatchedAsset::new("BTC", AssetId(1))
            .with_above(100.0)
            .with_alerts(true)
    }

    fn watch_list() -> (WatchList, SharedAlerts) {
        let alerts = SharedAlerts::new();
        (WatchList::new(vec![btc()], alerts.clone()), alerts)
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let (list, _) = watch_list();

        assert_eq!(
            list.add(WatchedAsset::new("btc", AssetId(99))),
            Err(WatchListError::DuplicateSymbol("btc".to_string()))
        );
        assert_eq!(
            list.add(WatchedAsset::new("XBT", AssetId(1))),
            Err(WatchListError::DuplicateId(AssetId(1)))
        );
        let mut unresolved = WatchedAsset::new("NEW", AssetId(5));
        unresolved.id = None;
        assert!(matches!(list.add(unresolved), Err(WatchListError::Unresolved(_))));

        assert!(list.add(WatchedAsset::new("ETH", AssetId(1027))).is_ok());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_find_by_symbol_ignores_case() {
        let (list, _) = watch_list();
        assert_eq!(list.find_by_symbol("bTc").and_then(|a| a.id), Some(AssetId(1)));
        assert!(list.find_by_symbol("ETH").is_none());
    }

    #[test]
    fn test_remove_clears_alert_state() {
        let (list, alerts) = watch_list();
        alerts.evaluate(&btc(), Some(150.0));
        assert_eq!(alerts.triggered_count(), 1);

        assert!(list.remove(AssetId(1)).is_some());
        assert!(list.is_empty());
        assert_eq!(alerts.entries_for(AssetId(1)), 0);
        assert!(list.remove(AssetId(1)).is_none());
    }

    #[test]
    fn test_threshold_change_rearms_old_key() {
        let (list, alerts) = watch_list();
        alerts.evaluate(&btc(), Some(150.0));

        assert!(list.set_threshold(AssetId(1), BoundKind::Above, Some(120.0)));
        assert_eq!(alerts.triggered_count(), 0);

        // Still above the new threshold, so it fires again.
        let asset = list.find_by_symbol("BTC").unwrap();
        assert_eq!(asset.alert_above, Some(120.0));
        assert_eq!(alerts.evaluate(&asset, Some(150.0)).len(), 1);
    }

    #[test]
    fn test_same_threshold_keeps_state() {
        let (list, alerts) = watch_list();
        alerts.evaluate(&btc(), Some(150.0));

        list.set_threshold(AssetId(1), BoundKind::Above, Some(100.0));
        assert_eq!(alerts.triggered_count(), 1);
    }

    #[test]
    fn test_clearing_threshold_resets_it() {
        let (list, alerts) = watch_list();
        alerts.evaluate(&btc(), Some(150.0));

        list.set_threshold(AssetId(1), BoundKind::Above, None);
        assert_eq!(alerts.triggered_count(), 0);
        assert!(!list.set_threshold(AssetId(42), BoundKind::Below, Some(1.0)));
    }

    #[test]
    fn test_deactivate_clears_alerts() {
        let (list, alerts) = watch_list();
        alerts.evaluate(&btc(), Some(150.0));

        // Turning alerts on again leaves state alone.
        list.set_alert_active(AssetId(1), true);
        assert_eq!(alerts.triggered_count(), 1);

        list.set_alert_active(AssetId(1), false);
        assert_eq!(alerts.triggered_count(), 0);
        assert!(!list.find_by_symbol("BTC").unwrap().alert_active);
    }

    #[test]
    fn test_provider_sees_later_edits() {
        let (list, _) = watch_list();
        let provider = list.provider();
        list.add(WatchedAsset::new("ETH", AssetId(1027))).unwrap();
        assert_eq!(provider().len(), 2);
    }
}
