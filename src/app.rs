use std::collections::HashMap;
use std::error::Error;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::runtime::Handle;

use crate::cli::Args;
use crate::console::{self, Command};
use crate::core::{
    alerts::SharedAlerts,
    config::{self, ConfigManager, ConfigOrigin, Settings},
    dispatch::{self, DispatchQueue, Dispatcher, TickStatus, UiUpdate, DEFAULT_DISPATCH_CAPACITY},
    error::FetchError,
    model::{AssetId, BoundKind, WatchedAsset},
    notify::DispatchSink,
    scheduler::{PollingScheduler, ScheduleState, StartOutcome, StopOutcome, TickOutcome},
    sound::SoundPlayer,
    watchlist::WatchList,
};
use crate::provider::coingecko::{HistorySummary, HISTORY_DAYS};
use crate::provider::{CoinGeckoClient, CoinMarketCapClient};

type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;
type StdinLines = Lines<BufReader<Stdin>>;

/// How often the foreground drains the dispatch queue.
const DRAIN_INTERVAL: Duration = Duration::from_millis(250);

fn init_logging() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr) // stdout is the price view
        .init();
}

pub fn run() {
    init_logging();
    let args = Args::parse();
    if let Err(e) = run_with_args(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

pub fn run_with_args(args: Args) -> AppResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(args));
    // stdin is read on a blocking thread that never returns on its own.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn async_main(args: Args) -> AppResult<()> {
    log::info!("Starting coin-watcher...");

    let config_manager = ConfigManager::new(args.config_dir());
    let (mut settings, origin) = config_manager.load_with_origin();
    if let ConfigOrigin::Fallback { backup } = &origin {
        println!(
            "{} could not be read, starting with default settings. It is only overwritten once you change something.",
            config_manager.path().display()
        );
        if let Some(backup) = backup {
            println!("A copy of it was saved to {}.", backup.display());
        }
    }
    if let Some(secs) = args.interval {
        config::validate_interval(secs)?;
        settings.refresh_interval_seconds = secs;
    }
    settings.refresh_interval()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let api_key = match settings.effective_api_key(std::env::var(config::API_KEY_ENV).ok()) {
        Some(key) => key,
        None => {
            println!(
                "No CoinMarketCap API key found in {} or {}.",
                config_manager.path().display(),
                config::API_KEY_ENV
            );
            let key = read_api_key(&mut lines)
                .await?
                .ok_or("No CoinMarketCap API key entered")?;
            settings.api_key = Some(key.clone());
            key
        }
    };
    let client = Arc::new(CoinMarketCapClient::new(Some(api_key)));

    resolve_unresolved(&client, &mut settings.watched_coins).await;

    let sound_enabled = settings.sound_enabled && !args.no_sound;
    let player = SoundPlayer::new(&settings.sound_file);
    let (mut app, queue) = App::new(config_manager, settings, client, Some(player), sound_enabled);
    app.persist_loaded(&origin);
    app.start_tracking();
    app.run_loop(lines, queue).await;
    Ok(())
}

/// Ask for an API key on stdin. `None` on an empty line or end of input.
async fn read_api_key<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> AppResult<Option<String>> {
    print!("Enter your CoinMarketCap API key (empty line to quit): ");
    std::io::stdout().flush()?;
    let key = lines
        .next_line()
        .await?
        .map(|line| line.trim().to_string())
        .filter(|key| !key.is_empty());
    Ok(key)
}

/// Look up ids for entries saved by symbol only. Entries that stay
/// unresolved are kept but never fetched.
async fn resolve_unresolved(client: &CoinMarketCapClient, coins: &mut [WatchedAsset]) {
    for asset in coins.iter_mut().filter(|a| a.id.is_none()) {
        match client.resolve_symbol(&asset.symbol).await {
            Ok(Some((id, name))) => {
                log::info!("Resolved {} to id {} ({})", asset.symbol, id, name);
                asset.id = Some(id);
                asset.name = Some(name);
            }
            Ok(None) => log::warn!("Unknown symbol {} in config, it will be ignored", asset.symbol),
            Err(e) => {
                log::warn!("Could not resolve {}: {}", asset.symbol, e);
                if e.is_auth() {
                    return;
                }
            }
        }
    }
}

struct App {
    config_manager: ConfigManager,
    settings: Settings,
    watch_list: WatchList,
    alerts: SharedAlerts,
    client: Arc<CoinMarketCapClient>,
    history: CoinGeckoClient,
    scheduler: PollingScheduler<CoinMarketCapClient>,
    dispatcher: Dispatcher,
    sound_toggle: Arc<AtomicBool>,
    /// Last price and 24h change per asset, for `list`.
    rows: HashMap<AssetId, (Option<f64>, Option<f64>)>,
    last_status: Option<(TickStatus, DateTime<Local>)>,
    /// Set from an auth failure until a new key is entered; stdin lines are
    /// read as the key meanwhile.
    auth_failed: bool,
    shutting_down: bool,
}

impl App {
    fn new(
        config_manager: ConfigManager,
        settings: Settings,
        client: Arc<CoinMarketCapClient>,
        player: Option<SoundPlayer>,
        sound_enabled: bool,
    ) -> (Self, DispatchQueue) {
        let (dispatcher, queue) = dispatch::channel(DEFAULT_DISPATCH_CAPACITY);
        let alerts = SharedAlerts::new();
        let sink = DispatchSink::new(dispatcher.clone(), player, sound_enabled);
        let sound_toggle = sink.sound_toggle();
        let scheduler = PollingScheduler::new(
            Handle::current(),
            Arc::clone(&client),
            alerts.clone(),
            Arc::new(sink),
        );
        let watch_list = WatchList::new(settings.watched_coins.clone(), alerts.clone());

        let app = Self {
            config_manager,
            settings,
            watch_list,
            alerts,
            client,
            history: CoinGeckoClient::new(),
            scheduler,
            dispatcher,
            sound_toggle,
            rows: HashMap::new(),
            last_status: None,
            auth_failed: false,
            shutting_down: false,
        };
        (app, queue)
    }

    /// Write back the settings as loaded (resolved ids, entered key). An
    /// unreadable config stays on disk until the user edits something.
    fn persist_loaded(&mut self, origin: &ConfigOrigin) {
        if matches!(origin, ConfigOrigin::Fallback { .. }) {
            log::info!("Not saving defaults over the unreadable config");
            return;
        }
        self.persist();
    }

    fn persist(&mut self) {
        self.settings.watched_coins = self.watch_list.snapshot();
        if let Err(e) = self.config_manager.save(&self.settings) {
            log::error!("Failed to save settings: {}", e);
        }
    }

    fn start_tracking(&mut self) {
        let interval = Duration::from_secs(self.settings.refresh_interval_seconds);
        match self
            .scheduler
            .start(self.watch_list.provider(), interval, self.dispatcher.clone())
        {
            StartOutcome::Started => println!(
                "Tracking {} coins every {}s. Type 'help' for commands.",
                self.watch_list.len(),
                self.settings.refresh_interval_seconds
            ),
            other => log::warn!("Could not start tracking: {:?}", other),
        }
    }

    async fn run_loop(&mut self, mut lines: StdinLines, mut queue: DispatchQueue) {
        let mut stdin_open = true;
        let mut drain = tokio::time::interval(DRAIN_INTERVAL);
        // Created once so a Ctrl-C during a slow command is still seen.
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = drain.tick() => self.drain(&mut queue).await,
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("stdin closed, press Ctrl-C to exit");
                        stdin_open = false;
                    }
                    Err(e) => {
                        log::warn!("Could not read stdin: {}", e);
                        stdin_open = false;
                    }
                },
                _ = &mut ctrl_c => {
                    println!();
                    break;
                }
            }
        }

        self.shutting_down = true;
        self.shutdown().await;
        self.drain(&mut queue).await;
    }

    async fn shutdown(&mut self) {
        match self.scheduler.stop().await {
            StopOutcome::Stopped => println!("Tracking stopped."),
            StopOutcome::Abandoned => {
                println!("Tracker did not stop in time and was abandoned.")
            }
            StopOutcome::NotRunning | StopOutcome::Pending => {}
        }
        self.persist();
    }

    async fn drain(&mut self, queue: &mut DispatchQueue) {
        for update in queue.drain() {
            match update {
                UiUpdate::Price {
                    id,
                    symbol,
                    price,
                    change_24h,
                    ..
                } => {
                    self.rows.insert(id, (price, change_24h));
                    println!("{}", console::price_row(&symbol, price, change_24h));
                }
                UiUpdate::Alert { message, kind, .. } => {
                    println!("{}", console::alert_line(&message, kind));
                }
                UiUpdate::Status { status, at } => self.show_status(status, at),
                UiUpdate::AuthRequired(msg) => self.on_auth_failure(&msg).await,
            }
        }
    }

    fn show_status(&mut self, status: TickStatus, at: DateTime<Local>) {
        let repeated = self.last_status.as_ref().is_some_and(|(s, _)| *s == status);
        match status {
            TickStatus::Fetching { .. } => log::debug!("{}", status),
            _ if repeated => {}
            _ => println!("[{}] {}", at.format("%H:%M:%S"), status),
        }
        self.last_status = Some((status, at));
    }

    /// Stop tracking, forget the rejected key and ask for a new one.
    async fn on_auth_failure(&mut self, msg: &str) {
        if self.auth_failed {
            return;
        }
        self.auth_failed = true;
        self.scheduler.stop().await;
        self.client.set_api_key(None);
        self.settings.api_key = None;
        self.persist();
        println!("!!! CoinMarketCap rejected the API key: {}", msg);
        if self.shutting_down {
            return;
        }
        println!("Tracking stopped and the stored key was cleared.");
        println!("Enter a new CoinMarketCap API key (or 'quit'):");
    }

    /// Returns false when the user asked to quit.
    fn accept_api_key(&mut self, line: &str) -> bool {
        let key = line.trim();
        if key.is_empty() {
            println!("Enter a new CoinMarketCap API key (or 'quit'):");
            return true;
        }
        if matches!(key.to_ascii_lowercase().as_str(), "quit" | "exit" | "q") {
            return false;
        }

        self.client.set_api_key(Some(key.to_string()));
        self.settings.api_key = Some(key.to_string());
        self.auth_failed = false;
        self.persist();
        println!("API key saved.");
        if std::env::var_os(config::API_KEY_ENV).is_some() {
            println!(
                "{} is set and will still take precedence over the saved key on the next start.",
                config::API_KEY_ENV
            );
        }
        self.start_tracking();
        true
    }

    /// Returns false when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        if self.auth_failed {
            return self.accept_api_key(line);
        }

        let cmd = match console::parse_command(line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return true,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };

        match cmd {
            Command::Quit => return false,
            Command::Help => println!("{}", console::HELP),
            Command::List => self.print_list(),
            Command::Status => self.print_status(),
            Command::Add(symbol) => self.add_coin(&symbol).await,
            Command::Remove(symbol) => self.remove_coin(&symbol),
            Command::Threshold {
                symbol,
                bound,
                value,
            } => self.set_threshold(&symbol, bound, value),
            Command::Alerts { symbol, active } => self.set_alerts(&symbol, active),
            Command::Interval(secs) => self.change_interval(secs).await,
            Command::Sound(on) => self.set_sound(on),
            Command::History(symbol) => self.show_history(&symbol).await,
        }
        true
    }

    fn watched_id(&self, symbol: &str) -> Option<AssetId> {
        let id = self.watch_list.find_by_symbol(symbol).and_then(|a| a.id);
        if id.is_none() {
            println!("{} is not on the watch list.", symbol);
        }
        id
    }

    async fn add_coin(&mut self, symbol: &str) {
        if self.watch_list.find_by_symbol(symbol).is_some() {
            println!("{} is already being watched.", symbol);
            return;
        }

        let (id, name) = match self.client.resolve_symbol(symbol).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                println!("CoinMarketCap does not know the symbol {}.", symbol);
                return;
            }
            Err(FetchError::Auth(msg)) => {
                self.on_auth_failure(&msg).await;
                return;
            }
            Err(e) => {
                println!("Could not look up {}: {}", symbol, e);
                return;
            }
        };

        let mut asset = WatchedAsset::new(symbol, id);
        asset.name = Some(name.clone());
        if let Err(e) = self.watch_list.add(asset.clone()) {
            println!("{}", e);
            return;
        }
        self.persist();
        println!("Added {} ({}).", symbol, name);

        // Fill the new row now instead of waiting for the next tick.
        if let TickOutcome::Failed(FetchError::Auth(msg)) =
            self.scheduler.fetch_once(&[asset], &self.dispatcher).await
        {
            self.on_auth_failure(&msg).await;
        }
    }

    fn remove_coin(&mut self, symbol: &str) {
        let Some(id) = self.watched_id(symbol) else {
            return;
        };
        if self.watch_list.remove(id).is_some() {
            self.rows.remove(&id);
            self.persist();
            println!("Removed {}.", symbol);
        }
    }

    fn set_threshold(&mut self, symbol: &str, bound: BoundKind, value: Option<f64>) {
        let Some(id) = self.watched_id(symbol) else {
            return;
        };
        self.watch_list.set_threshold(id, bound, value);
        self.persist();
        match value {
            Some(v) => println!("{} {} alert set to {}.", symbol, bound, console::format_price(Some(v))),
            None => println!("{} {} alert cleared.", symbol, bound),
        }
    }

    fn set_alerts(&mut self, symbol: &str, active: bool) {
        let Some(id) = self.watched_id(symbol) else {
            return;
        };
        self.watch_list.set_alert_active(id, active);
        self.persist();
        println!("Alerts for {} {}.", symbol, if active { "on" } else { "off" });
    }

    async fn change_interval(&mut self, secs: u64) {
        let interval = match config::validate_interval(secs) {
            Ok(interval) => interval,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };
        self.settings.refresh_interval_seconds = secs;
        self.persist();

        match self.scheduler.restart(interval).await {
            StartOutcome::Started => println!("Refreshing every {}s.", secs),
            StartOutcome::NotConfigured => self.start_tracking(),
            other => println!("Interval saved, but the tracker could not restart yet ({:?}).", other),
        }
    }

    fn set_sound(&mut self, on: bool) {
        self.sound_toggle.store(on, Ordering::Relaxed);
        self.settings.sound_enabled = on;
        self.persist();
        println!("Alert sound {}.", if on { "on" } else { "off" });
    }

    async fn show_history(&self, symbol: &str) {
        let coin_id = match self.history.coin_id_by_symbol(symbol).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                println!("CoinGecko does not list the symbol {}.", symbol);
                return;
            }
            Err(e) => {
                println!("Could not look up {} on CoinGecko: {}", symbol, e);
                return;
            }
        };

        let summary = match self.history.market_chart(&coin_id, HISTORY_DAYS).await {
            Ok(points) => HistorySummary::from_points(&points),
            Err(e) => {
                println!("No price history for {} ({}): {}", symbol, coin_id, e);
                return;
            }
        };
        match summary {
            Some(summary) => {
                for line in console::history_lines(symbol, HISTORY_DAYS, &summary) {
                    println!("{}", line);
                }
            }
            None => println!("No price history for {} ({}).", symbol, coin_id),
        }
    }

    fn print_list(&self) {
        let assets = self.watch_list.snapshot();
        if assets.is_empty() {
            println!("The watch list is empty. Use 'add SYM'.");
            return;
        }
        for asset in &assets {
            let (price, change) = asset
                .id
                .and_then(|id| self.rows.get(&id).copied())
                .unwrap_or((None, None));
            println!(
                "{}  {} {}",
                console::describe_asset(asset),
                console::format_price(price),
                console::format_change(change)
            );
        }
    }

    fn print_status(&self) {
        let state = match self.scheduler.state() {
            ScheduleState::Running => "running",
            ScheduleState::Stopping => "stopping",
            ScheduleState::Idle => "stopped",
        };
        println!(
            "Tracker {}, every {}s, {} coins, {} alerts currently fired, sound {}.",
            state,
            self.settings.refresh_interval_seconds,
            self.watch_list.len(),
            self.alerts.triggered_count(),
            if self.sound_toggle.load(Ordering::Relaxed) { "on" } else { "off" }
        );
        if let Some((status, at)) = &self.last_status {
            println!("Last update [{}]: {}", at.format("%H:%M:%S"), status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    /// App whose client has no key, so every lookup fails authentication
    /// before a request is made.
    fn keyless_app(dir: &Path, settings: Settings) -> (App, DispatchQueue) {
        let client = Arc::new(CoinMarketCapClient::new(None).with_base_url("http://127.0.0.1:9"));
        App::new(ConfigManager::new(dir.to_path_buf()), settings, client, None, false)
    }

    #[tokio::test]
    async fn test_unreadable_config_survives_startup() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        let original = r#"{"watched_coins": [{"symbol": "BTC", "id": 1}],}"#;
        fs::write(manager.path(), original).unwrap();

        let (settings, origin) = manager.load_with_origin();
        let (mut app, _queue) = keyless_app(dir.path(), settings);
        app.persist_loaded(&origin);

        assert_eq!(fs::read_to_string(manager.path()).unwrap(), original);

        // A real edit does write, and the backup keeps the old file.
        app.set_sound(false);
        assert!(!manager.load().sound_enabled);
        assert_eq!(fs::read_to_string(manager.backup_path()).unwrap(), original);
    }

    #[tokio::test]
    async fn test_readable_config_is_written_back() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        fs::write(manager.path(), r#"{"refresh_interval_seconds": 3}"#).unwrap();

        let (settings, origin) = manager.load_with_origin();
        let (mut app, _queue) = keyless_app(dir.path(), settings);
        app.persist_loaded(&origin);

        let written = fs::read_to_string(manager.path()).unwrap();
        assert!(written.contains("\"sound_file\""), "defaults filled in: {}", written);
        assert!(written.contains("\"refresh_interval_seconds\": 10"));
    }

    #[tokio::test]
    async fn test_auth_failure_on_add_stops_tracking_and_takes_new_key() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            api_key: Some("rejected".to_string()),
            ..Default::default()
        };
        let (mut app, _queue) = keyless_app(dir.path(), settings);
        // Empty watch list: the loop only sends heartbeats and never fetches.
        app.start_tracking();
        assert_eq!(app.scheduler.state(), ScheduleState::Running);

        app.add_coin("ETH").await;

        assert_eq!(app.scheduler.state(), ScheduleState::Idle);
        assert!(app.auth_failed);
        assert_eq!(app.config_manager.load().api_key, None);

        // Blank lines re-prompt; anything else is taken as the key.
        assert!(app.handle_line("   ").await);
        assert!(app.auth_failed);
        assert!(app.handle_line("fresh-key").await);

        assert!(!app.auth_failed);
        assert_eq!(app.scheduler.state(), ScheduleState::Running);
        assert_eq!(app.config_manager.load().api_key.as_deref(), Some("fresh-key"));
        assert_eq!(app.scheduler.stop().await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_quit_while_asked_for_key() {
        let dir = tempdir().unwrap();
        let (mut app, _queue) = keyless_app(dir.path(), Settings::default());

        app.on_auth_failure("Invalid API Key").await;

        assert!(!app.handle_line("quit").await);
    }

    #[tokio::test]
    async fn test_read_api_key() {
        let mut lines = BufReader::new(&b"  abc-123 \n"[..]).lines();
        assert_eq!(read_api_key(&mut lines).await.unwrap().as_deref(), Some("abc-123"));
        assert_eq!(read_api_key(&mut lines).await.unwrap(), None);

        let mut blank = BufReader::new(&b"\n"[..]).lines();
        assert_eq!(read_api_key(&mut blank).await.unwrap(), None);
    }
}
