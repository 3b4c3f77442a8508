//! SQLite backend for an Environet distribution node.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. An upload is resolved and written
//! inside a single SQLite transaction.

mod encode;
mod family;
mod provision;
mod resolve;
mod schema;
mod store;
mod upsert;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
pub use upsert::RESULT_CHUNK;
