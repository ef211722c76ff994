//! Alert delivery to the visual surface and the sound player.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::alerts::{AlertEvent, AlertKind};
use super::dispatch::{Dispatcher, UiUpdate};
use super::error::PlaybackError;
use super::sound::SoundPlayer;

/// Sink for alert notifications.
pub trait NotificationSink: Send + Sync {
    /// Must return quickly; never blocks the caller.
    fn visual_alert(&self, symbol: &str, message: &str, kind: AlertKind);

    fn sound_enabled(&self) -> bool;

    /// Blocking playback. Only called when `sound_enabled()` is true.
    fn play_alert_sound(&self) -> Result<(), PlaybackError>;
}

/// Symbol slot used for visual alerts about the sound player itself.
pub const SOUND_ERROR_SOURCE: &str = "Sound Error";

/// Route fired alerts to `sink`.
///
/// Sound playback runs as one detached blocking task per alert. A playback
/// failure is logged and shown as an [`AlertKind::Error`] visual alert.
pub fn deliver_alerts(sink: &Arc<dyn NotificationSink>, events: &[AlertEvent]) {
    for event in events {
        sink.visual_alert(&event.symbol, &event.message, event.kind());

        if sink.sound_enabled() {
            let sink = Arc::clone(sink);
            let symbol = event.symbol.clone();
            let play = move || {
                if let Err(e) = sink.play_alert_sound() {
                    log::warn!("Alert sound for {} failed: {}", symbol, e);
                    sink.visual_alert(
                        SOUND_ERROR_SOURCE,
                        &format!("Could not play the alert sound: {}", e),
                        AlertKind::Error,
                    );
                }
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(play);
                }
                Err(_) => {
                    thread::spawn(play);
                }
            }
        }
    }
}

/// Sink used by the application: visual alerts go through the dispatch
/// channel, sound through a [`SoundPlayer`].
pub struct DispatchSink {
    dispatcher: Dispatcher,
    player: Option<SoundPlayer>,
    sound_enabled: Arc<AtomicBool>,
}

impl DispatchSink {
    pub fn new(dispatcher: Dispatcher, player: Option<SoundPlayer>, sound_enabled: bool) -> Self {
        Self {
            dispatcher,
            player,
            sound_enabled: Arc::new(AtomicBool::new(sound_enabled)),
        }
    }

    /// Shared toggle so the foreground can flip sound on/off at runtime.
    pub fn sound_toggle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.sound_enabled)
    }
}

impl NotificationSink for DispatchSink {
    fn visual_alert(&self, symbol: &str, message: &str, kind: AlertKind) {
        self.dispatcher.send(UiUpdate::Alert {
            symbol: symbol.to_string(),
            message: message.to_string(),
            kind,
        });
    }

    fn sound_enabled(&self) -> bool {
        self.player.is_some() && self.sound_enabled.load(Ordering::Relaxed)
    }

    fn play_alert_sound(&self) -> Result<(), PlaybackError> {
        match &self.player {
            Some(player) => player.play(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch;
    use crate::core::model::{AssetId, BoundKind};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        visuals: Mutex<Vec<(String, AlertKind)>>,
        plays: AtomicUsize,
        sound: bool,
        fail_playback: bool,
    }

    impl NotificationSink for RecordingSink {
        fn visual_alert(&self, symbol: &str, _message: &str, kind: AlertKind) {
            self.visuals.lock().unwrap().push((symbol.to_string(), kind));
        }

        fn sound_enabled(&self) -> bool {
            self.sound
        }

        fn play_alert_sound(&self) -> Result<(), PlaybackError> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.fail_playback {
                Err(PlaybackError::Device("no output device".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn event(bound: BoundKind) -> AlertEvent {
        AlertEvent::new(AssetId(1), "BTC", bound, 100.0, 110.0)
    }

    fn wait_for_plays(sink: &RecordingSink, expected: usize) {
        for _ in 0..100 {
            if sink.plays.load(Ordering::SeqCst) >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn wait_for_visuals(sink: &RecordingSink, expected: usize) {
        for _ in 0..100 {
            if sink.visuals.lock().unwrap().len() >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_sound_skipped_when_disabled() {
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn NotificationSink> = recording.clone();

        deliver_alerts(&sink, &[event(BoundKind::Above)]);

        assert_eq!(recording.visuals.lock().unwrap().len(), 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recording.plays.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_playback_failure_is_swallowed() {
        let recording = Arc::new(RecordingSink {
            sound: true,
            fail_playback: true,
            ..Default::default()
        });
        let sink: Arc<dyn NotificationSink> = recording.clone();

        deliver_alerts(&sink, &[event(BoundKind::Above), event(BoundKind::Below)]);
        wait_for_plays(&recording, 2);
        wait_for_visuals(&recording, 4);

        assert_eq!(recording.plays.load(Ordering::SeqCst), 2);
        let visuals = recording.visuals.lock().unwrap();
        let kinds_for = |symbol: &str| -> Vec<AlertKind> {
            visuals.iter().filter(|(s, _)| s == symbol).map(|(_, k)| *k).collect()
        };
        assert_eq!(kinds_for("BTC"), vec![AlertKind::Above, AlertKind::Below]);
        assert_eq!(kinds_for(SOUND_ERROR_SOURCE), vec![AlertKind::Error, AlertKind::Error]);
    }

    #[tokio::test]
    async fn test_missing_sound_file_shows_error_alert() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, mut queue) = dispatch::channel(8);
        let player = SoundPlayer::new(dir.path().join("missing.mp3"));
        let sink: Arc<dyn NotificationSink> = Arc::new(DispatchSink::new(dispatcher, Some(player), true));

        deliver_alerts(&sink, &[event(BoundKind::Above)]);

        let mut kinds = Vec::new();
        for _ in 0..100 {
            kinds.extend(queue.drain().into_iter().filter_map(|u| match u {
                UiUpdate::Alert { kind, .. } => Some(kind),
                _ => None,
            }));
            if kinds.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(kinds, vec![AlertKind::Above, AlertKind::Error]);
    }

    #[test]
    fn test_dispatch_sink_forwards_visuals() {
        let (dispatcher, mut queue) = dispatch::channel(8);
        let sink = DispatchSink::new(dispatcher, None, true);

        sink.visual_alert("ETH", "ETH has exceeded", AlertKind::Above);

        assert!(!sink.sound_enabled(), "no player means no sound");
        let updates = queue.drain();
        assert!(matches!(
            &updates[0],
            UiUpdate::Alert { symbol, kind: AlertKind::Above, .. } if symbol == "ETH"
        ));
    }
}
