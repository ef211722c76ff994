#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
pub mod cli;
pub mod console;
pub mod core;
pub mod provider;

pub mod app;
pub use app::run;
