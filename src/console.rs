//! Line commands and text rendering for the console front end.

use std::fmt;

use crate::core::alerts::model::format_usd;
use crate::core::alerts::AlertKind;
use crate::core::model::{BoundKind, WatchedAsset};
use crate::provider::coingecko::{HistorySummary, PricePoint};

pub const HELP: &str = "\
Commands:
  add SYM                 start watching a coin
  remove SYM              stop watching a coin
  above SYM N|none        set or clear the upper alert
  below SYM N|none        set or clear the lower alert
  alerts SYM on|off       enable or disable alerts for a coin
  interval N              refresh every N seconds (min 10)
  sound on|off            toggle the alert sound
  list                    show the watch list
  history SYM             30-day price range from CoinGecko
  status                  show tracker status
  help                    show this text
  quit                    stop tracking and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(String),
    Remove(String),
    Threshold {
        symbol: String,
        bound: BoundKind,
        value: Option<f64>,
    },
    Alerts { symbol: String, active: bool },
    Interval(u64),
    Sound(bool),
    History(String),
    List,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type 'help' for commands)", self.0)
    }
}

fn symbol_arg(arg: Option<&str>, usage: &str) -> Result<String, ParseError> {
    arg.map(str::to_uppercase)
        .ok_or_else(|| ParseError(format!("usage: {}", usage)))
}

fn on_off(arg: Option<&str>, usage: &str) -> Result<bool, ParseError> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(ParseError(format!("usage: {}", usage))),
    }
}

/// `none`/`off`/`clear` remove the threshold; anything else must be a
/// positive number.
fn threshold_arg(arg: Option<&str>, usage: &str) -> Result<Option<f64>, ParseError> {
    let raw = arg.ok_or_else(|| ParseError(format!("usage: {}", usage)))?;
    if matches!(raw.to_ascii_lowercase().as_str(), "none" | "off" | "clear") {
        return Ok(None);
    }
    let value: f64 = raw
        .replace(['$', ','], "")
        .parse()
        .map_err(|_| ParseError(format!("'{}' is not a number", raw)))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ParseError("thresholds must be positive".to_string()));
    }
    Ok(Some(value))
}

/// Parse one input line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let first = words.next();
    let second = words.next();

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "add" => Command::Add(symbol_arg(first, "add SYM")?),
        "remove" | "rm" => Command::Remove(symbol_arg(first, "remove SYM")?),
        "above" | "below" => {
            let bound = if verb.eq_ignore_ascii_case("above") {
                BoundKind::Above
            } else {
                BoundKind::Below
            };
            let usage = format!("{} SYM N|none", bound);
            Command::Threshold {
                symbol: symbol_arg(first, &usage)?,
                value: threshold_arg(second, &usage)?,
                bound,
            }
        }
        "alerts" => Command::Alerts {
            symbol: symbol_arg(first, "alerts SYM on|off")?,
            active: on_off(second, "alerts SYM on|off")?,
        },
        "interval" => {
            let secs = first
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ParseError("usage: interval N".to_string()))?;
            Command::Interval(secs)
        }
        "sound" => Command::Sound(on_off(first, "sound on|off")?),
        "history" | "hist" => Command::History(symbol_arg(first, "history SYM")?),
        "list" | "ls" => Command::List,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ParseError(format!("unknown command '{}'", other))),
    };
    Ok(Some(cmd))
}

/// Price text; sub-cent prices keep eight decimals.
pub fn format_price(price: Option<f64>) -> String {
    match price {
        Some(p) if p > 0.0 && p < 0.01 => format!("${:.8}", p),
        Some(p) => format_usd(p),
        None => "Error".to_string(),
    }
}

pub fn format_change(change_24h: Option<f64>) -> String {
    change_24h.map_or_else(|| "-".to_string(), |c| format!("{:+.2}%", c))
}

pub fn price_row(symbol: &str, price: Option<f64>, change_24h: Option<f64>) -> String {
    format!(
        "{:<8} {:>18} {:>9}",
        symbol,
        format_price(price),
        format_change(change_24h)
    )
}

pub fn alert_line(message: &str, kind: AlertKind) -> String {
    match kind {
        AlertKind::Above => format!("*** ALERT (above) *** {}", message),
        AlertKind::Below => format!("*** ALERT (below) *** {}", message),
        AlertKind::Error => format!("!!! {}", message),
    }
}

/// `history` output: period, first/last with change, low and high.
pub fn history_lines(symbol: &str, days: u32, summary: &HistorySummary) -> Vec<String> {
    let day = |p: &PricePoint| p.at.format("%Y-%m-%d").to_string();
    vec![
        format!(
            "{} over {} days ({} points, {} to {}):",
            symbol,
            days,
            summary.points,
            day(&summary.first),
            day(&summary.last)
        ),
        format!(
            "  first {}  last {}  change {}",
            format_price(Some(summary.first.price)),
            format_price(Some(summary.last.price)),
            format_change(summary.change_pct())
        ),
        format!(
            "  low   {} on {}",
            format_price(Some(summary.min.price)),
            day(&summary.min)
        ),
        format!(
            "  high  {} on {}",
            format_price(Some(summary.max.price)),
            day(&summary.max)
        ),
    ]
}

/// One `list` line: symbol, name, thresholds and alert switch.
pub fn describe_asset(asset: &WatchedAsset) -> String {
    let bound = |v: Option<f64>| v.map_or_else(|| "-".to_string(), format_usd);
    format!(
        "{:<8} {:<20} above {:>14}  below {:>14}  alerts {}",
        asset.symbol,
        asset.name.as_deref().unwrap_or(""),
        bound(asset.alert_above),
        bound(asset.alert_below),
        if asset.alert_active { "on" } else { "off" }
    )
}
