//! Metric storage for Sword.
//!
//! In-memory per-pair datasets backed by SQLite snapshots.

mod aggregate;
mod dataset;
mod models;
mod registry;
mod store;
mod time_range;

pub use aggregate::*;
pub use dataset::*;
pub use models::*;
pub use registry::*;
pub use store::*;
pub use time_range::*;

use thiserror::Error;

/// Errors returned by dataset operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("no such target id {target_id} or observer id {observer_id}")]
    NotFound { target_id: i64, observer_id: i64 },
    #[error("no such target id {0}")]
    TargetNotFound(i64),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
