// Price source implementations.
pub mod coingecko;
pub mod coinmarketcap;

pub use coingecko::CoinGeckoClient;
pub use coinmarketcap::CoinMarketCapClient;
