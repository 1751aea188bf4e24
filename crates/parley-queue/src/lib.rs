//! # parley-queue
//!
//! The durable relay queue: an at-least-once producer/consumer channel
//! with explicit acknowledgment, decoupling message submission from
//! delivery.
//!
//! The contract is deliberately broker-agnostic -- publish an opaque
//! payload onto a named queue, claim the oldest unclaimed payload,
//! acknowledge it once processing finished.  An envelope claimed by a
//! consumer that dies before acking returns to the queue and is delivered
//! again, so consumers must tolerate duplicates.  This implementation
//! stores envelopes in a SQLite file, which keeps them across a relay
//! process restart; any external broker offering the same
//! publish/consume/ack semantics could be substituted without touching the
//! producers or consumers.

pub mod queue;

mod error;

pub use error::QueueError;
pub use queue::{Delivery, DurableQueue};
