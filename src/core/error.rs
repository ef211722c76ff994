use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::model::AssetId;

/// Failure of a whole price fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Credentials rejected. Fatal to the polling loop until the user re-authenticates.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network hiccup, rate limit or server error. Retried on the next tick.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The response could not be decoded at all.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("alert sound file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("could not decode alert sound: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("refresh interval must be at least {min} seconds, got {got}")]
    IntervalTooShort { got: u64, min: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchListError {
    #[error("{0} is already being watched")]
    DuplicateSymbol(String),

    #[error("asset id {0} is already being watched")]
    DuplicateId(AssetId),

    #[error("{0} has not been resolved to a provider id")]
    Unresolved(String),
}
