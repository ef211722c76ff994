// Price alert module: debounced upper/lower threshold alerts.
//
// Architecture:
// - model.rs: Alert keys, trigger state and event types
// - triggers.rs: Bound comparison (breached vs. inside the band)
// - engine.rs: Per-key state machine driving evaluation
// - shared.rs: Lock-owning handle used across the polling task and the foreground

pub mod engine;
pub mod model;
pub mod shared;
pub mod triggers;

pub use engine::AlertEngine;
pub use model::{AlertEvent, AlertKey, AlertKind, TriggerState};
pub use shared::SharedAlerts;
