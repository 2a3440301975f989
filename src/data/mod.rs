//! Data layer module
//!
//! Handles all data persistence and caching:
//! - SQLite database operations
//! - Actor cache (volatile)

mod cache;
mod database;
mod models;

pub use cache::ActorCache;
pub use database::Database;
pub use models::*;
