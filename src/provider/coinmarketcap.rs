//! CoinMarketCap `quotes/latest` client.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::core::error::FetchError;
use crate::core::model::{AssetId, Quote};
use crate::core::source::{PriceSnapshot, PriceSource, QuoteEntry};

pub const CMC_API_BASE_URL: &str = "https://pro-api.coinmarketcap.com/v1/cryptocurrency";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// CMC `status.error_code` values that mean the key itself is the problem.
const AUTH_ERROR_CODES: [i64; 4] = [1001, 1002, 1003, 1006];
const AUTH_ERROR_HINTS: [&str; 4] = [
    "api key missing",
    "invalid api key",
    "is not a valid uuid",
    "not a valid plan",
];

fn usable_key(api_key: Option<String>) -> Option<String> {
    api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Clones share the API key, so replacing it reaches the polling loop too.
#[derive(Clone)]
pub struct CoinMarketCapClient {
    http: Client,
    api_key: Arc<RwLock<Option<String>>>,
    base_url: String,
}

impl CoinMarketCapClient {
    pub fn new(api_key: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: Arc::new(RwLock::new(usable_key(api_key))),
            base_url: CMC_API_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the key used by every later request. Blank keys clear it.
    pub fn set_api_key(&self, api_key: Option<String>) {
        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = usable_key(api_key);
    }

    fn api_key(&self) -> Option<String> {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn quotes_latest(&self, query: (&str, String)) -> Result<(StatusCode, String), FetchError> {
        let Some(api_key) = self.api_key() else {
            return Err(FetchError::Auth("API key missing".to_string()));
        };

        let url = format!("{}/quotes/latest", self.base_url);
        log::debug!("GET {} {}={}", url, query.0, query.1);
        let res = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, api_key.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[query])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        Ok((status, body))
    }

    /// Look up a ticker symbol. `Ok(None)` when CMC does not know it.
    pub async fn resolve_symbol(&self, symbol: &str) -> Result<Option<(AssetId, String)>, FetchError> {
        let symbol = symbol.trim().to_uppercase();
        let (status, body) = self.quotes_latest(("symbol", symbol.clone())).await?;

        // Unknown symbols come back as 400 "Invalid value for symbol".
        let value = match classify_response(status.as_u16(), &body) {
            Ok(value) => value,
            Err(FetchError::Transient(msg)) if status == StatusCode::BAD_REQUEST => {
                log::debug!("Symbol {} rejected: {}", symbol, msg);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(parse_symbol_entry(&value, &symbol))
    }
}

impl PriceSource for CoinMarketCapClient {
    async fn fetch(&self, ids: &[AssetId]) -> Result<PriceSnapshot, FetchError> {
        let joined = ids
            .iter()
            .map(AssetId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let (status, body) = self.quotes_latest(("id", joined)).await?;
        let value = classify_response(status.as_u16(), &body)?;
        Ok(parse_quotes(&value, ids))
    }
}

fn cmc_status(value: &Value) -> (Option<i64>, Option<String>) {
    let status = value.get("status");
    let code = status.and_then(|s| s.get("error_code")).and_then(Value::as_i64);
    let message = status
        .and_then(|s| s.get("error_message"))
        .and_then(Value::as_str)
        .map(str::to_string);
    (code, message)
}

fn is_auth_failure(http_status: u16, code: Option<i64>, message: Option<&str>) -> bool {
    if matches!(http_status, 401 | 402 | 403) {
        return true;
    }
    if code.is_some_and(|c| AUTH_ERROR_CODES.contains(&c)) {
        return true;
    }
    message.is_some_and(|m| {
        let lower = m.to_lowercase();
        AUTH_ERROR_HINTS.iter().any(|hint| lower.contains(hint))
    })
}

/// Map an HTTP status and raw body onto the fetch error taxonomy.
pub fn classify_response(http_status: u16, body: &str) -> Result<Value, FetchError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let (code, message) = parsed.as_ref().map(cmc_status).unwrap_or((None, None));
    let describe = || message.clone().unwrap_or_else(|| format!("HTTP {}", http_status));

    if is_auth_failure(http_status, code, message.as_deref()) {
        return Err(FetchError::Auth(describe()));
    }
    if !(200..300).contains(&http_status) {
        return Err(FetchError::Transient(format!("HTTP {}: {}", http_status, describe())));
    }
    if code.is_some_and(|c| c != 0) {
        return Err(FetchError::Transient(describe()));
    }

    let Some(value) = parsed else {
        return Err(FetchError::Malformed("response is not JSON".to_string()));
    };
    if value.get("data").is_none() {
        return Err(FetchError::Malformed("response has no data".to_string()));
    }
    Ok(value)
}

/// Single-id entries come back either as an object or a one-element list.
fn unwrap_entry(entry: &Value) -> Option<&Value> {
    match entry {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn parse_quote(entry: &Value) -> Result<Quote, String> {
    let entry = unwrap_entry(entry).ok_or("empty entry list")?;
    let usd = entry.pointer("/quote/USD").ok_or("missing quote.USD")?;
    let price = usd
        .get("price")
        .and_then(Value::as_f64)
        .ok_or("price is not a number")?;
    let change_24h = usd
        .get("percent_change_24h")
        .and_then(Value::as_f64)
        .ok_or("percent_change_24h is not a number")?;
    Ok(Quote { price, change_24h })
}

/// Decode `data` into one slot per requested id. Ids CMC left out stay absent.
pub fn parse_quotes(value: &Value, ids: &[AssetId]) -> PriceSnapshot {
    let mut snapshot = PriceSnapshot::new();
    let Some(data) = value.get("data") else {
        return snapshot;
    };

    for id in ids {
        let Some(entry) = data.get(id.to_string()) else {
            continue;
        };
        let slot = match parse_quote(entry) {
            Ok(quote) => QuoteEntry::Quote(quote),
            Err(reason) => QuoteEntry::Malformed(reason),
        };
        snapshot.insert(*id, slot);
    }
    snapshot
}

fn parse_symbol_entry(value: &Value, symbol: &str) -> Option<(AssetId, String)> {
    let entry = unwrap_entry(value.get("data")?.get(symbol)?)?;
    let id = entry.get("id").and_then(Value::as_u64)?;
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(symbol)
        .to_string();
    Some((AssetId(id), name))
}
