//! # parley-store
//!
//! Message persistence for the relay, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the message
//! record.  A message is persisted *before* any delivery attempt is made;
//! the store is therefore also the fallback delivery path -- an offline
//! recipient picks messages up from here on its next history fetch.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
