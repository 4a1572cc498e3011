pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod matching;
pub mod models;
pub mod rate_limit;
pub mod store;
pub mod sweeper;

pub use config::ExchangeConfig;
pub use error::{ExchangeError, ExchangeResult};
