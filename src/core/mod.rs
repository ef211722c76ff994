pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod sound;
pub mod source;
pub mod watchlist;
