//! The storage connection: the only path between the framework and the store.
//!
//! `StorageConnection` is the boundary the framework codes against;
//! `SqlStorageConnection` implements it over a SQLite pool. Statement logic is
//! grouped by concern in `jobs`, `collections` and `servers`.

mod collections;
mod jobs;
mod servers;
pub mod sql;
pub mod r#trait;

pub use r#trait::StorageConnection;
pub use sql::SqlStorageConnection;
