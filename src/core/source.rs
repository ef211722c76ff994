//! Price source seam.
//!
//! The polling core never talks HTTP; it asks a [`PriceSource`] for an
//! already-decoded snapshot keyed by asset id.

use std::collections::HashMap;
use std::future::Future;

use super::error::FetchError;
use super::model::{AssetId, Quote};

/// One id's slot in a fetch result.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteEntry {
    Quote(Quote),
    /// The provider returned something for this id that could not be parsed.
    Malformed(String),
}

/// Result of one successful fetch. Ids the provider did not answer are absent.
pub type PriceSnapshot = HashMap<AssetId, QuoteEntry>;

pub trait PriceSource: Send + Sync {
    /// Fetch current quotes for `ids`.
    ///
    /// Timeouts are the source's business. Dropping the returned future must be
    /// safe; the scheduler does so when it is cancelled mid-fetch.
    fn fetch(&self, ids: &[AssetId]) -> impl Future<Output = Result<PriceSnapshot, FetchError>> + Send;
}
