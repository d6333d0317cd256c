//! Local store abstraction for FieldSync.
//!
//! The sync engine reads pending rows from, and writes pulled rows into,
//! a [`LocalStore`]. Two implementations ship with the crate:
//! - [`MemoryStore`]: in-process, for tests and embedding
//! - [`SqliteStore`]: SQLite database, one table per [`TableSpec`]
//!
//! [`TableSpec`]: fieldsync_common::TableSpec

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{LocalStore, SYNC_STATUS_COLUMN};
