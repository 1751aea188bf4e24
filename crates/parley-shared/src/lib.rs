//! # parley-shared
//!
//! Types shared between the relay server and any Rust endpoint: user
//! identities, the JSON wire protocol spoken over the WebSocket, the
//! auth-token claim format, and protocol constants.
//!
//! This crate does no I/O.

pub mod auth;
pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::AuthError;
pub use types::{CallMediaKind, MessageKind, UserId};
