// Alert model types: trigger-state keys, per-key state and fired events.

use std::fmt;

use chrono::{DateTime, Utc};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::core::model::{AssetId, BoundKind};

/// Identity of one tracked alert: asset, bound side and the threshold value.
///
/// The threshold is part of the key so that editing a threshold yields a
/// fresh, armed alert instead of inheriting the old trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub id: AssetId,
    pub bound: BoundKind,
    threshold_bits: u64,
}

impl AlertKey {
    pub fn new(id: AssetId, bound: BoundKind, threshold: f64) -> Self {
        // -0.0 and 0.0 must map to the same key
        let normalized = if threshold == 0.0 { 0.0 } else { threshold };
        Self {
            id,
            bound,
            threshold_bits: normalized.to_bits(),
        }
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits)
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.id, self.bound, self.threshold())
    }
}

/// Two-state debouncer value held per key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerState {
    /// Eligible to fire on the next crossing.
    Armed,
    /// Already fired; waits for the price to return inside the band.
    Triggered { at: DateTime<Utc>, price: f64 },
}

impl TriggerState {
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }
}

/// Kind passed to the visual notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Above,
    Below,
    Error,
}

impl From<BoundKind> for AlertKind {
    fn from(bound: BoundKind) -> Self {
        match bound {
            BoundKind::Above => Self::Above,
            BoundKind::Below => Self::Below,
        }
    }
}

/// Alert event fired when a price crosses an armed bound.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub id: AssetId,
    pub symbol: String,
    pub bound: BoundKind,
    pub threshold: f64,
    pub price: f64,
    pub message: String,
    pub fired_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(id: AssetId, symbol: &str, bound: BoundKind, threshold: f64, price: f64) -> Self {
        Self {
            id,
            symbol: symbol.to_string(),
            bound,
            threshold,
            price,
            message: alert_message(symbol, bound, threshold, price),
            fired_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> AlertKind {
        self.bound.into()
    }
}

/// Human-readable alert text, e.g.
/// `BTC has exceeded the price of $40,000.00! Current price: $41,000.00`.
pub fn alert_message(symbol: &str, bound: BoundKind, threshold: f64, price: f64) -> String {
    let verb = match bound {
        BoundKind::Above => "has exceeded",
        BoundKind::Below => "has fallen below",
    };
    format!(
        "{} {} the price of {}! Current price: {}",
        symbol,
        verb,
        format_usd(threshold),
        format_usd(price)
    )
}

/// Dollar amount with thousands separators and two decimals.
pub fn format_usd(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let cents = (amount.abs() * 100.0).round() as u64;
    format!(
        "{}${}.{:02}",
        sign,
        (cents / 100).to_formatted_string(&Locale::en),
        cents % 100
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_threshold() {
        let a = AlertKey::new(AssetId(1), BoundKind::Above, 100.0);
        let b = AlertKey::new(AssetId(1), BoundKind::Above, 150.0);
        assert_ne!(a, b);
        assert_eq!(a, AlertKey::new(AssetId(1), BoundKind::Above, 100.0));
        assert_eq!(b.threshold(), 150.0);
    }

    #[test]
    fn test_key_zero_sign_normalized() {
        assert_eq!(
            AlertKey::new(AssetId(7), BoundKind::Below, 0.0),
            AlertKey::new(AssetId(7), BoundKind::Below, -0.0)
        );
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(41000.0), "$41,000.00");
        assert_eq!(format_usd(0.8), "$0.80");
        assert_eq!(format_usd(1234567.891), "$1,234,567.89");
        assert_eq!(format_usd(9.999), "$10.00");
    }

    #[test]
    fn test_alert_messages() {
        assert_eq!(
            alert_message("BTC", BoundKind::Above, 40000.0, 41000.0),
            "BTC has exceeded the price of $40,000.00! Current price: $41,000.00"
        );
        assert_eq!(
            alert_message("ADA", BoundKind::Below, 0.8, 0.7),
            "ADA has fallen below the price of $0.80! Current price: $0.70"
        );
    }
}
