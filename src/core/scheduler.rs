//! Background price polling.
//!
//! One tokio task per scheduler fetches quotes for the current watch list,
//! runs them through the alert engine and hands UI updates to the foreground
//! through the dispatch channel. Start and stop are idempotent, and no two
//! loops ever run at the same time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::alerts::SharedAlerts;
use super::dispatch::{Dispatcher, TickStatus, UiUpdate};
use super::error::FetchError;
use super::model::{AssetId, WatchedAsset};
use super::notify::{deliver_alerts, NotificationSink};
use super::source::{PriceSource, QuoteEntry};

/// Upper bound on how long `stop()` waits for the loop to wind down.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback into caller-owned state, invoked once per tick.
pub type WatchListProvider = Arc<dyn Fn() -> Vec<WatchedAsset> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A previous loop is still shutting down; try again later.
    StopPending,
    /// `restart` was called before any `start`.
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop observed the cancellation and exited.
    Stopped,
    /// Nothing was running (or the loop had already exited on its own).
    NotRunning,
    /// Another `stop()` is already waiting for the loop.
    Pending,
    /// The loop did not exit within the timeout and was aborted.
    Abandoned,
}

/// Why a polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    AuthRequired,
}

/// Per-tick tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub updated: usize,
    pub missing: usize,
    pub malformed: usize,
    pub alerts: usize,
}

impl TickReport {
    pub fn unavailable(&self) -> usize {
        self.missing + self.malformed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing resolvable to fetch.
    Skipped,
    Completed(TickReport),
    Failed(FetchError),
}

struct WorkerControl {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<LoopExit>,
}

#[derive(Clone)]
struct LaunchConfig {
    watch_list: WatchListProvider,
    interval: Duration,
    dispatcher: Dispatcher,
}

#[derive(Default)]
struct Control {
    worker: Option<WorkerControl>,
    stopping: bool,
    /// Aborted loop that may not have unwound yet.
    abandoned: Option<JoinHandle<LoopExit>>,
    last_launch: Option<LaunchConfig>,
}

pub struct PollingScheduler<P> {
    runtime: Handle,
    source: Arc<P>,
    alerts: SharedAlerts,
    sink: Arc<dyn NotificationSink>,
    stop_timeout: Duration,
    control: Mutex<Control>,
}

impl<P: PriceSource + 'static> PollingScheduler<P> {
    pub fn new(
        runtime: Handle,
        source: Arc<P>,
        alerts: SharedAlerts,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            runtime,
            source,
            alerts,
            sink,
            stop_timeout: STOP_TIMEOUT,
            control: Mutex::new(Control::default()),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick_context(&self, dispatcher: Dispatcher) -> TickContext<P> {
        TickContext {
            source: Arc::clone(&self.source),
            alerts: self.alerts.clone(),
            sink: Arc::clone(&self.sink),
            dispatcher,
        }
    }

    pub fn state(&self) -> ScheduleState {
        let control = self.lock_control();
        let abandoned_alive = control.abandoned.as_ref().is_some_and(|h| !h.is_finished());
        if control.stopping || abandoned_alive {
            ScheduleState::Stopping
        } else if control.worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            ScheduleState::Running
        } else {
            ScheduleState::Idle
        }
    }

    /// Interval of the most recent launch.
    pub fn interval(&self) -> Option<Duration> {
        self.lock_control().last_launch.as_ref().map(|l| l.interval)
    }

    /// Start the polling loop unless one is already alive.
    pub fn start(
        &self,
        watch_list: WatchListProvider,
        interval: Duration,
        dispatcher: Dispatcher,
    ) -> StartOutcome {
        let mut control = self.lock_control();
        if control.stopping {
            return StartOutcome::StopPending;
        }
        if let Some(handle) = &control.abandoned {
            if !handle.is_finished() {
                return StartOutcome::StopPending;
            }
            control.abandoned = None;
        }
        if let Some(worker) = &control.worker {
            if !worker.handle.is_finished() {
                return StartOutcome::AlreadyRunning;
            }
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = self.tick_context(dispatcher.clone());
        let handle = self
            .runtime
            .spawn(run_loop(ctx, Arc::clone(&watch_list), interval, cancel_rx));

        control.worker = Some(WorkerControl { cancel_tx, handle });
        control.last_launch = Some(LaunchConfig {
            watch_list,
            interval,
            dispatcher,
        });
        StartOutcome::Started
    }

    /// Cancel the loop and wait for it, bounded by the stop timeout.
    pub async fn stop(&self) -> StopOutcome {
        let worker = {
            let mut control = self.lock_control();
            if control.stopping {
                return StopOutcome::Pending;
            }
            match control.worker.take() {
                Some(worker) if !worker.handle.is_finished() => {
                    control.stopping = true;
                    worker
                }
                _ => return StopOutcome::NotRunning,
            }
        };

        log::info!("Stopping price polling loop...");
        let _ = worker.cancel_tx.send(true);

        let mut guard = StopGuard {
            control: &self.control,
            worker: Some(worker),
        };
        let Some(handle) = guard.worker.as_mut().map(|w| &mut w.handle) else {
            return StopOutcome::NotRunning;
        };

        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(_)) => {
                guard.worker = None;
                StopOutcome::Stopped
            }
            Ok(Err(e)) => {
                log::error!("Price polling loop ended abnormally: {}", e);
                guard.worker = None;
                StopOutcome::Stopped
            }
            Err(_) => {
                log::warn!(
                    "Price polling loop did not stop within {:?}, abandoning it",
                    self.stop_timeout
                );
                // The guard aborts the task and parks its handle on drop.
                StopOutcome::Abandoned
            }
        }
    }

    /// Stop, then start again with a new interval and the last launch's
    /// watch list and dispatcher.
    pub async fn restart(&self, interval: Duration) -> StartOutcome {
        let launch = self.lock_control().last_launch.clone();
        let Some(launch) = launch else {
            return StartOutcome::NotConfigured;
        };

        let stopped = self.stop().await;
        log::debug!("Restart: previous loop {:?}", stopped);
        self.start(launch.watch_list, interval, launch.dispatcher)
    }

    /// Fetch and evaluate `assets` right now, outside the schedule.
    ///
    /// Used when a new asset is added so its row fills immediately. Does not
    /// touch the loop's run state.
    pub async fn fetch_once(&self, assets: &[WatchedAsset], dispatcher: &Dispatcher) -> TickOutcome {
        self.tick_context(dispatcher.clone()).run_tick(assets).await
    }
}

/// Clears the stopping flag even if the `stop()` future is dropped early.
struct StopGuard<'a> {
    control: &'a Mutex<Control>,
    /// Still set when the loop has not been joined.
    worker: Option<WorkerControl>,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        control.stopping = false;
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
            control.abandoned = Some(worker.handle);
        }
    }
}

struct TickContext<P> {
    source: Arc<P>,
    alerts: SharedAlerts,
    sink: Arc<dyn NotificationSink>,
    dispatcher: Dispatcher,
}

impl<P: PriceSource> TickContext<P> {
    async fn run_tick(&self, assets: &[WatchedAsset]) -> TickOutcome {
        let ids = resolvable_ids(assets);
        if ids.is_empty() {
            self.dispatcher.send(UiUpdate::status(TickStatus::NoAssets));
            return TickOutcome::Skipped;
        }

        self.dispatcher
            .send(UiUpdate::status(TickStatus::Fetching { count: ids.len() }));

        let snapshot = match self.source.fetch(&ids).await {
            Ok(snapshot) => snapshot,
            Err(FetchError::Auth(msg)) => {
                log::error!("Price provider rejected credentials: {}", msg);
                return TickOutcome::Failed(FetchError::Auth(msg));
            }
            Err(e) => {
                log::warn!("Price fetch failed, retrying next tick: {}", e);
                self.dispatcher
                    .send(UiUpdate::status(TickStatus::TransientError(e.to_string())));
                return TickOutcome::Failed(e);
            }
        };

        let mut report = TickReport::default();
        for asset in assets {
            let Some(id) = asset.id else {
                continue;
            };

            let quote = match snapshot.get(&id) {
                Some(QuoteEntry::Quote(q)) if q.price.is_finite() && q.change_24h.is_finite() => Some(*q),
                Some(QuoteEntry::Quote(q)) => {
                    log::warn!("Non-finite quote for {} ({}): {:?}", asset.symbol, id, q);
                    report.malformed += 1;
                    None
                }
                Some(QuoteEntry::Malformed(reason)) => {
                    log::warn!("Malformed quote for {} ({}): {}", asset.symbol, id, reason);
                    report.malformed += 1;
                    None
                }
                None => {
                    log::debug!("No price returned for {} ({})", asset.symbol, id);
                    report.missing += 1;
                    None
                }
            };

            // Evaluation happens before the row update for the same asset.
            if let Some(quote) = quote {
                let events = self.alerts.evaluate(asset, Some(quote.price));
                deliver_alerts(&self.sink, &events);
                report.alerts += events.len();
                report.updated += 1;
            }

            self.dispatcher.send(UiUpdate::Price {
                id,
                symbol: asset.symbol.clone(),
                price: quote.map(|q| q.price),
                change_24h: quote.map(|q| q.change_24h),
                ok: quote.is_some(),
            });
        }

        self.dispatcher.send(UiUpdate::status(TickStatus::Updated {
            updated: report.updated,
            unavailable: report.unavailable(),
        }));
        TickOutcome::Completed(report)
    }
}

/// Unique ids in watch-list order; unresolved entries are skipped.
fn resolvable_ids(assets: &[WatchedAsset]) -> Vec<AssetId> {
    let mut seen = HashSet::new();
    assets
        .iter()
        .filter_map(|a| a.id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Resolves once cancellation is requested or the scheduler is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

async fn run_loop<P: PriceSource>(
    ctx: TickContext<P>,
    watch_list: WatchListProvider,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> LoopExit {
    log::info!("Price polling loop started (every {:?})", interval);

    let exit = loop {
        let assets = watch_list();

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break LoopExit::Cancelled,
            outcome = ctx.run_tick(&assets) => outcome,
        };

        if let TickOutcome::Failed(FetchError::Auth(msg)) = outcome {
            ctx.dispatcher.send(UiUpdate::AuthRequired(msg));
            break LoopExit::AuthRequired;
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break LoopExit::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }
    };

    if exit == LoopExit::Cancelled {
        ctx.dispatcher.send(UiUpdate::status(TickStatus::Stopped));
    }
    log::info!("Price polling loop stopped ({:?})", exit);
    exit
}
