//! Persistence layer modules.

pub mod db;
pub mod overflow_repo;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
