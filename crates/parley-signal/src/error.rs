use thiserror::Error;

use crate::session::CallPhase;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignalError {
    /// The requested transition is not legal from the current phase.
    #[error("invalid transition: {from:?} -> {attempted}")]
    InvalidTransition {
        from: CallPhase,
        attempted: &'static str,
    },
}
