//! Database module: the append-only sync log table.
//!
//! - `model`: row types returned by queries.
//! - `repo`: SQL-only functions that map rows into domain records.
//!
//! Callers import from `media_sync::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;
