//! Common utilities and types shared across FieldSync crates.
//!
//! This crate provides the error taxonomy, the closed set of synchronized
//! tables and their static descriptors.

pub mod catalog;
pub mod error;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
pub use schema::{FieldKind, FieldSpec, ForeignKey, NaturalKey, TableSpec};
pub use types::{Record, StatusCounts, SyncStatus, TableId};
