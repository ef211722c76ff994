use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::model::WatchedAsset;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 10;
/// Environment variable that takes precedence over the stored API key.
pub const API_KEY_ENV: &str = "CMC_PRO_API_KEY";

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

fn default_sound_file() -> PathBuf {
    PathBuf::from("assets/alert.mp3")
}

/// Persisted application settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub watched_coins: Vec<WatchedAsset>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    #[serde(default = "default_sound_file")]
    pub sound_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            watched_coins: Vec::new(),
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL_SECS,
            sound_enabled: true,
            sound_file: default_sound_file(),
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Result<Duration, ConfigError> {
        validate_interval(self.refresh_interval_seconds)
    }

    /// Key to use for requests: a non-empty `env_key` wins over the stored one.
    pub fn effective_api_key(&self, env_key: Option<String>) -> Option<String> {
        env_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .map(|k| k.trim().to_string())
    }

    /// Drop watch-list entries without a symbol, clear thresholds that are not
    /// positive numbers and pull the interval up to the minimum. Returns the
    /// number of entries dropped.
    pub fn sanitize(&mut self) -> usize {
        if self.refresh_interval_seconds < MIN_REFRESH_INTERVAL_SECS {
            log::warn!(
                "Refresh interval {}s is below the minimum, using {}s",
                self.refresh_interval_seconds,
                MIN_REFRESH_INTERVAL_SECS
            );
            self.refresh_interval_seconds = MIN_REFRESH_INTERVAL_SECS;
        }

        let before = self.watched_coins.len();
        self.watched_coins.retain(|asset| {
            if asset.symbol.trim().is_empty() {
                log::warn!("Dropping watch-list entry without a symbol");
                return false;
            }
            true
        });

        for asset in &mut self.watched_coins {
            for (bound, slot) in [
                ("above", &mut asset.alert_above),
                ("below", &mut asset.alert_below),
            ] {
                if let Some(t) = *slot {
                    if !t.is_finite() || t <= 0.0 {
                        log::warn!(
                            "{}: ignoring {} alert {}, thresholds must be positive numbers",
                            asset.symbol,
                            bound,
                            t
                        );
                        *slot = None;
                    }
                }
            }

            if let (Some(above), Some(below)) = (asset.alert_above, asset.alert_below) {
                if below > above {
                    log::warn!(
                        "{}: lower alert ({}) is above the upper alert ({}), both may fire at once",
                        asset.symbol,
                        below,
                        above
                    );
                }
            }
        }

        before - self.watched_coins.len()
    }
}

pub fn validate_interval(seconds: u64) -> Result<Duration, ConfigError> {
    if seconds < MIN_REFRESH_INTERVAL_SECS {
        return Err(ConfigError::IntervalTooShort {
            got: seconds,
            min: MIN_REFRESH_INTERVAL_SECS,
        });
    }
    Ok(Duration::from_secs(seconds))
}

/// Where the settings returned by [`ConfigManager::load_with_origin`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Read from the config file.
    File,
    /// No file existed; defaults were written.
    Created,
    /// The file could not be read. Defaults are in use and the file was left
    /// in place, with a copy at `backup` when one could be made.
    Fallback { backup: Option<PathBuf> },
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(app_config_dir: PathBuf) -> Self {
        Self {
            config_path: app_config_dir.join(CONFIG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.config_path.with_extension("json.bak")
    }

    /// Load settings, falling back to defaults. A missing file is created
    /// with the defaults so the user has something to edit.
    pub fn load(&self) -> Settings {
        self.load_with_origin().0
    }

    /// Like [`load`](Self::load), also reporting whether the defaults stand
    /// in for an unreadable file. An unreadable file is never overwritten here.
    pub fn load_with_origin(&self) -> (Settings, ConfigOrigin) {
        let (mut settings, origin) = if self.config_path.exists() {
            match self.read() {
                Ok(settings) => (settings, ConfigOrigin::File),
                Err(e) => {
                    log::warn!(
                        "Could not read {}, using defaults: {}",
                        self.config_path.display(),
                        e
                    );
                    let backup = self.backup_path();
                    let backup = match fs::copy(&self.config_path, &backup) {
                        Ok(_) => {
                            log::warn!("Unreadable config copied to {}", backup.display());
                            Some(backup)
                        }
                        Err(e) => {
                            log::warn!("Could not back up {}: {}", self.config_path.display(), e);
                            None
                        }
                    };
                    (Settings::default(), ConfigOrigin::Fallback { backup })
                }
            }
        } else {
            let defaults = Settings::default();
            match self.save(&defaults) {
                Ok(()) => log::info!("Created default config at {}", self.config_path.display()),
                Err(e) => log::warn!("Could not write default config: {}", e),
            }
            (defaults, ConfigOrigin::Created)
        };

        settings.sanitize();
        (settings, origin)
    }

    fn read(&self) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }
}
