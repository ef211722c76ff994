// Bound evaluation for price alerts.
//
// A bound is either breached (price strictly outside the band) or inside it.
// Touching the threshold exactly counts as inside, which re-arms the alert.

use crate::core::model::BoundKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundCheck {
    Breached,
    Inside,
}

/// Compare a price against one threshold.
pub fn check_bound(bound: BoundKind, threshold: f64, price: f64) -> BoundCheck {
    let breached = match bound {
        BoundKind::Above => price > threshold,
        BoundKind::Below => price < threshold,
    };
    if breached {
        BoundCheck::Breached
    } else {
        BoundCheck::Inside
    }
}
