//! Data layer module
//!
//! Handles all data persistence:
//! - User store
//! - Server-side sessions

mod database;
mod models;

pub use database::Database;
pub use models::*;
