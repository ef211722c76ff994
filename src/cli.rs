use std::path::PathBuf;

use clap::{Parser, ValueHint};

/// Watch crypto prices and get alerted when they cross your thresholds.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
pub struct Args {
    /// Directory holding config.json (default: current directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub config_dir: Option<PathBuf>,

    /// Refresh interval in seconds, saved to the config (minimum 10)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Mute alert sounds for this session
    #[arg(long)]
    pub no_sound: bool,
}

impl Args {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from(["coin-watcher", "--config-dir", "/tmp/cw", "--interval", "30", "--no-sound"]);
        assert_eq!(args.config_dir(), PathBuf::from("/tmp/cw"));
        assert_eq!(args.interval, Some(30));
        assert!(args.no_sound);

        let defaults = Args::parse_from(["coin-watcher"]);
        assert_eq!(defaults.config_dir(), PathBuf::from("."));
        assert!(!defaults.no_sound);
    }
}
