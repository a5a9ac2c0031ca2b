pub mod api;
pub mod commands;
pub mod concurrent_fetcher;
pub mod data_collector;
pub mod database_sqlx;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod utils;

pub use error::{SyncError, SyncResult};
