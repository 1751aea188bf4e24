//! Candidate buffering.
//!
//! A network-path candidate may legitimately arrive before the session
//! description it belongs with has been applied.  Until then candidates are
//! queued; once the description is in place the queue is drained exactly
//! once, in arrival order, and every later candidate passes straight
//! through.
//!
//! A call endpoint holds two of these, one per direction: one for locally
//! gathered candidates waiting for the path to the peer to be ready, one
//! for remote candidates waiting for the remote description.

use serde_json::Value;

/// What to do with a candidate handed to [`CandidateBuffer::push`].
#[derive(Debug, PartialEq)]
pub enum CandidateDisposition {
    /// Held; it will come back out of [`CandidateBuffer::drain`].
    Buffered,
    /// The buffer is already drained -- apply/send immediately.
    Immediate(Value),
}

/// Ordered hold-until-ready queue for one call direction.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: Vec<Value>,
    ready: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the buffer has been released by [`CandidateBuffer::drain`].
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Offer a candidate.  Buffered until the first drain, immediate after.
    pub fn push(&mut self, candidate: Value) -> CandidateDisposition {
        if self.ready {
            CandidateDisposition::Immediate(candidate)
        } else {
            self.queue.push(candidate);
            CandidateDisposition::Buffered
        }
    }

    /// Release the buffer: returns everything held so far in arrival order
    /// and switches the buffer to pass-through.
    ///
    /// Draining twice yields an empty second batch; the held candidates are
    /// handed out exactly once.
    pub fn drain(&mut self) -> Vec<Value> {
        self.ready = true;
        std::mem::take(&mut self.queue)
    }
}
