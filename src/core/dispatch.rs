//! Hand-off from background work to the foreground context.
//!
//! The polling task never touches UI state. It pushes [`UiUpdate`]s into a
//! bounded channel that the foreground drains once per iteration of its own
//! event loop.

use std::fmt;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::alerts::AlertKind;
use super::model::AssetId;

pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// Heartbeat while there is nothing resolvable to fetch.
    NoAssets,
    Fetching { count: usize },
    Updated { updated: usize, unavailable: usize },
    TransientError(String),
    Stopped,
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAssets => write!(f, "No coins to watch"),
            Self::Fetching { count } => write!(f, "Fetching data... ({} coins)", count),
            Self::Updated { unavailable: 0, .. } => write!(f, "Data updated"),
            Self::Updated { updated, unavailable } => write!(
                f,
                "Data partially updated ({} ok, {} unavailable)",
                updated, unavailable
            ),
            Self::TransientError(msg) => write!(f, "API error: {}", msg),
            Self::Stopped => write!(f, "Tracking stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Fresh price row for one asset. `ok == false` means the value is unavailable.
    Price {
        id: AssetId,
        symbol: String,
        price: Option<f64>,
        change_24h: Option<f64>,
        ok: bool,
    },
    /// Highlight an asset row (or show an error banner for `AlertKind::Error`).
    Alert {
        symbol: String,
        message: String,
        kind: AlertKind,
    },
    Status { status: TickStatus, at: DateTime<Local> },
    /// The provider rejected the credentials; the loop has stopped.
    AuthRequired(String),
}

impl UiUpdate {
    pub fn status(status: TickStatus) -> Self {
        Self::Status {
            status,
            at: Local::now(),
        }
    }
}

/// Sending half, cloned into background tasks and notification sinks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<UiUpdate>,
}

impl Dispatcher {
    /// Queue an update without blocking. Returns false if it was dropped.
    pub fn send(&self, update: UiUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                log::warn!("Dispatch queue full, dropping UI update: {:?}", update);
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Dispatch queue closed, foreground is gone");
                false
            }
        }
    }
}

/// Receiving half, owned by the foreground loop.
#[derive(Debug)]
pub struct DispatchQueue {
    rx: mpsc::Receiver<UiUpdate>,
}

impl DispatchQueue {
    /// Take everything queued so far without waiting.
    pub fn drain(&mut self) -> Vec<UiUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            updates.push(update);
        }
        updates
    }
}

pub fn channel(capacity: usize) -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (Dispatcher { tx }, DispatchQueue { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_in_order() {
        let (dispatcher, mut queue) = channel(8);
        dispatcher.send(UiUpdate::status(TickStatus::NoAssets));
        dispatcher.send(UiUpdate::AuthRequired("bad key".to_string()));

        let updates = queue.drain();
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[1], UiUpdate::AuthRequired(_)));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (dispatcher, mut queue) = channel(1);
        assert!(dispatcher.send(UiUpdate::status(TickStatus::NoAssets)));
        assert!(!dispatcher.send(UiUpdate::status(TickStatus::Stopped)));
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(
            TickStatus::Updated { updated: 3, unavailable: 0 }.to_string(),
            "Data updated"
        );
        assert_eq!(
            TickStatus::Updated { updated: 2, unavailable: 1 }.to_string(),
            "Data partially updated (2 ok, 1 unavailable)"
        );
    }
}
