//! CoinGecko client for price history. Used by the `history` command only;
//! live quotes come from CoinMarketCap.

use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::error::FetchError;

pub const COINGECKO_API_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const HISTORY_DAYS: u32 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// The coin list is large and rarely changes.
const COIN_LIST_TTL: Duration = Duration::from_secs(3600);

/// Tickers shared by many CoinGecko listings, pinned to the coin people mean.
const PINNED_IDS: [(&str, &str); 5] = [
    ("btc", "bitcoin"),
    ("eth", "ethereum"),
    ("bnb", "binancecoin"),
    ("pepe", "pepe"),
    ("shib", "shiba-inu"),
];
/// Too generic to pick a listing by substring.
const GENERIC_WORDS: [&str; 2] = ["coin", "token"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinListing {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub price: f64,
}

/// Range of a price history, as printed by `history`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySummary {
    pub first: PricePoint,
    pub last: PricePoint,
    pub min: PricePoint,
    pub max: PricePoint,
    pub points: usize,
}

impl HistorySummary {
    /// `None` for an empty history.
    pub fn from_points(points: &[PricePoint]) -> Option<Self> {
        let first = *points.first()?;
        let last = *points.last()?;
        let mut min = first;
        let mut max = first;
        for point in points {
            if point.price < min.price {
                min = *point;
            }
            if point.price > max.price {
                max = *point;
            }
        }
        Some(Self {
            first,
            last,
            min,
            max,
            points: points.len(),
        })
    }

    /// Change from the first to the last point, in percent.
    pub fn change_pct(&self) -> Option<f64> {
        (self.first.price > 0.0).then(|| (self.last.price - self.first.price) / self.first.price * 100.0)
    }
}

pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
    coin_list: Mutex<Option<(Instant, Vec<CoinListing>)>>,
}

impl CoinGeckoClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: COINGECKO_API_BASE_URL.to_string(),
            coin_list: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);
        let res = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Transient(format!("HTTP {} from {}", status.as_u16(), path)));
        }
        res.json::<Value>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// Map a ticker symbol to a CoinGecko coin id. `Ok(None)` when no listing
    /// carries the symbol.
    pub async fn coin_id_by_symbol(&self, symbol: &str) -> Result<Option<String>, FetchError> {
        let mut cache = self.coin_list.lock().await;
        let stale = cache
            .as_ref()
            .map_or(true, |(fetched, _)| fetched.elapsed() > COIN_LIST_TTL);
        if stale {
            let value = self.get_json("/coins/list", &[]).await?;
            let list: Vec<CoinListing> =
                serde_json::from_value(value).map_err(|e| FetchError::Malformed(e.to_string()))?;
            log::info!("CoinGecko coin list loaded ({} coins)", list.len());
            *cache = Some((Instant::now(), list));
        }

        Ok(cache
            .as_ref()
            .and_then(|(_, list)| pick_coin_id(list, symbol)))
    }

    /// Daily-ish USD prices for the last `days` days, oldest first.
    pub async fn market_chart(&self, coin_id: &str, days: u32) -> Result<Vec<PricePoint>, FetchError> {
        let path = format!("/coins/{}/market_chart", coin_id);
        let value = self
            .get_json(&path, &[("vs_currency", "usd".to_string()), ("days", days.to_string())])
            .await?;
        parse_market_chart(&value)
    }
}

impl Default for CoinGeckoClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Choose the listing a ticker most likely refers to.
pub fn pick_coin_id(list: &[CoinListing], symbol: &str) -> Option<String> {
    let lower = symbol.trim().to_lowercase();
    if let Some((_, id)) = PINNED_IDS.iter().find(|(s, _)| *s == lower) {
        return Some((*id).to_string());
    }

    let matches: Vec<&CoinListing> = list.iter().filter(|c| c.symbol == lower).collect();
    if let Some(exact) = matches.iter().find(|c| c.id == lower) {
        return Some(exact.id.clone());
    }
    match matches.as_slice() {
        [] => return None,
        [only] => return Some(only.id.clone()),
        _ => {}
    }

    log::debug!(
        "{} matches several CoinGecko listings: {:?}",
        symbol,
        matches.iter().map(|c| c.id.as_str()).collect::<Vec<_>>()
    );
    let specific = !GENERIC_WORDS.contains(&lower.as_str());
    matches
        .iter()
        .find(|c| c.name.to_lowercase() == lower)
        .or_else(|| {
            matches
                .iter()
                .find(|c| specific && c.id.to_lowercase().contains(&lower))
        })
        .or_else(|| {
            matches
                .iter()
                .find(|c| specific && c.name.to_lowercase().contains(&lower))
        })
        .or_else(|| matches.first())
        .map(|c| c.id.clone())
}

/// Decode `prices: [[ms, price], ...]`. Points that are not a timestamp and a
/// number are skipped; a history with no usable point is malformed.
pub fn parse_market_chart(value: &Value) -> Result<Vec<PricePoint>, FetchError> {
    let raw = value
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("response has no prices list".to_string()))?;

    let points: Vec<PricePoint> = raw
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array().filter(|p| p.len() == 2)?;
            let millis = pair[0].as_f64()?;
            let price = pair[1].as_f64().filter(|p| p.is_finite())?;
            let at = Utc.timestamp_millis_opt(millis as i64).single()?;
            Some(PricePoint { at, price })
        })
        .collect();

    if raw.len() != points.len() {
        log::debug!("Skipped {} unusable history points", raw.len() - points.len());
    }
    if points.is_empty() {
        return Err(FetchError::Malformed("no usable history points".to_string()));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(id: &str, symbol: &str, name: &str) -> CoinListing {
        CoinListing {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_pick_coin_id() {
        let list = vec![
            listing("bitcoin", "btc", "Bitcoin"),
            listing("osmosis-allbtc", "btc", "Osmosis allBTC"),
            listing("cardano", "ada", "Cardano"),
            listing("solana", "sol", "Solana"),
            listing("sol", "sol", "Sol Token"),
            listing("bridged-xbn", "xbn", "Bridged XBN"),
            listing("xbn-chain", "xbn", "XBN"),
            listing("wrapped-one", "lnk", "Wrapped"),
            listing("chainlnk", "lnk", "Chain"),
        ];

        assert_eq!(pick_coin_id(&list, "BTC").as_deref(), Some("bitcoin"));
        assert_eq!(pick_coin_id(&list, "ada").as_deref(), Some("cardano"));
        assert_eq!(pick_coin_id(&list, "SOL").as_deref(), Some("sol"));
        // A listing named exactly like the ticker wins over id substrings.
        assert_eq!(pick_coin_id(&list, "xbn").as_deref(), Some("xbn-chain"));
        assert_eq!(pick_coin_id(&list, "lnk").as_deref(), Some("chainlnk"));
        assert_eq!(pick_coin_id(&list, "xyz"), None);
    }

    #[test]
    fn test_pick_coin_id_falls_back_to_first() {
        let list = vec![listing("alpha-one", "zz", "Alpha"), listing("beta-two", "zz", "Beta")];
        assert_eq!(pick_coin_id(&list, "ZZ").as_deref(), Some("alpha-one"));
    }

    #[test]
    fn test_parse_market_chart_skips_bad_points() {
        let value = json!({
            "prices": [
                [1_700_000_000_000_i64, 35000.5],
                [1_700_086_400_000_i64, null],
                ["yesterday", 1.0],
                [1_700_172_800_000_i64],
                [1_700_259_200_000_i64, 36000.0],
            ],
            "market_caps": [],
        });

        let points = parse_market_chart(&value).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 35000.5);
        assert_eq!(points[0].at.timestamp(), 1_700_000_000);
        assert_eq!(points[1].price, 36000.0);
    }

    #[test]
    fn test_parse_market_chart_malformed() {
        assert!(matches!(
            parse_market_chart(&json!({ "error": "coin not found" })),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            parse_market_chart(&json!({ "prices": [[1, "NaN"]] })),
            Err(FetchError::Malformed(msg)) if msg.contains("no usable")
        ));
    }

    #[test]
    fn test_history_summary() {
        let point = |secs: i64, price: f64| PricePoint {
            at: Utc.timestamp_opt(secs, 0).unwrap(),
            price,
        };
        let points = [point(0, 100.0), point(10, 80.0), point(20, 130.0), point(30, 110.0)];

        let summary = HistorySummary::from_points(&points).unwrap();

        assert_eq!(summary.first.price, 100.0);
        assert_eq!(summary.last.price, 110.0);
        assert_eq!(summary.min, point(10, 80.0));
        assert_eq!(summary.max, point(20, 130.0));
        assert_eq!(summary.points, 4);
        assert!((summary.change_pct().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(HistorySummary::from_points(&[]), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let client = CoinGeckoClient::new().with_base_url("http://127.0.0.1:9");
        assert!(matches!(
            client.market_chart("bitcoin", HISTORY_DAYS).await,
            Err(FetchError::Transient(_))
        ));
    }
}
