use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider-assigned identifier for an asset (CoinMarketCap numeric id).
///
/// Two watched assets are the same asset iff their ids match; the symbol is
/// only a display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AssetId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// One entry of the user's watch list, as persisted in config.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedAsset {
    pub symbol: String,
    /// Absent until the symbol has been resolved against the provider.
    #[serde(default)]
    pub id: Option<AssetId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alert_above: Option<f64>,
    #[serde(default)]
    pub alert_below: Option<f64>,
    #[serde(default)]
    pub alert_active: bool,
}

impl WatchedAsset {
    pub fn new(symbol: impl Into<String>, id: AssetId) -> Self {
        Self {
            symbol: symbol.into(),
            id: Some(id),
            name: None,
            alert_above: None,
            alert_below: None,
            alert_active: false,
        }
    }

    pub fn with_above(mut self, threshold: f64) -> Self {
        self.alert_above = Some(threshold);
        self
    }

    pub fn with_below(mut self, threshold: f64) -> Self {
        self.alert_below = Some(threshold);
        self
    }

    pub fn with_alerts(mut self, active: bool) -> Self {
        self.alert_active = active;
        self
    }

    /// Threshold configured for the given bound, if any.
    pub fn threshold(&self, bound: BoundKind) -> Option<f64> {
        match bound {
            BoundKind::Above => self.alert_above,
            BoundKind::Below => self.alert_below,
        }
    }
}

/// Which side of the band a threshold guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    Above,
    Below,
}

impl BoundKind {
    pub fn all() -> &'static [BoundKind] {
        &[Self::Above, Self::Below]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
        }
    }
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest market data for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    /// Percent change over the last 24 hours.
    pub change_24h: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watched_asset_defaults_from_json() {
        let asset: WatchedAsset = serde_json::from_str(r#"{"symbol": "BTC", "id": 1}"#).unwrap();
        assert_eq!(asset.id, Some(AssetId(1)));
        assert_eq!(asset.alert_above, None);
        assert_eq!(asset.alert_below, None);
        assert!(!asset.alert_active);
    }

    #[test]
    fn test_threshold_lookup_by_bound() {
        let asset = WatchedAsset::new("ETH", AssetId(1027))
            .with_above(3000.0)
            .with_below(2500.0);
        assert_eq!(asset.threshold(BoundKind::Above), Some(3000.0));
        assert_eq!(asset.threshold(BoundKind::Below), Some(2500.0));
    }
}
