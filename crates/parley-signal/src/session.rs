//! Per-attempt call session state machine.
//!
//! One [`CallSession`] tracks one call attempt from one endpoint's point of
//! view.  The caller walks `Idle -> Offering -> (Answered | Rejected |
//! TimedOut) -> Connected -> Ended`; the callee walks `Idle -> Ringing ->
//! (Accepted | Rejected) -> Connected -> Ended`.  Each attempt is
//! independent -- a second incoming offer gets its own session and the
//! first client-side transition wins, the relay never arbitrates.

use serde_json::Value;
use tracing::debug;

use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::{CallMediaKind, UserId};

use crate::candidates::{CandidateBuffer, CandidateDisposition};
use crate::error::SignalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Caller: offer sent, waiting on the callee.
    Offering,
    /// Callee: offer received, waiting on the local user.
    Ringing,
    /// Caller: answer received and applied.
    Answered,
    /// Callee: answer produced and sent.
    Accepted,
    Rejected,
    TimedOut,
    Connected,
    Ended,
}

impl CallPhase {
    /// A terminal phase accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallPhase::Rejected | CallPhase::TimedOut | CallPhase::Ended
        )
    }
}

/// What the endpoint should do after feeding a remote event to the session.
#[derive(Debug, PartialEq)]
pub enum SignalingAction {
    /// Apply the remote session description, then the drained candidates in
    /// the order given.
    ApplyRemoteDescription {
        description: Value,
        candidates: Vec<Value>,
    },
    /// Apply this candidate now.
    ApplyCandidate(Value),
    /// Candidate held until the remote description lands.
    CandidateBuffered,
    /// The remote party declined.
    Rejected,
    /// The remote party hung up.
    Ended,
    /// Nothing to do (event for another session or already-terminal state).
    Ignore,
}

pub struct CallSession {
    pub local_user: UserId,
    pub local_name: String,
    pub remote_user: UserId,
    pub media_kind: CallMediaKind,
    pub role: CallRole,
    pub phase: CallPhase,
    /// Offer held from `incoming` until the local user accepts.
    pending_offer: Option<Value>,
    /// Locally gathered candidates waiting for the signaling path to open.
    local_candidates: CandidateBuffer,
    /// Remote candidates waiting for the remote description to be applied.
    remote_candidates: CandidateBuffer,
}

impl CallSession {
    /// Start an outgoing attempt.  Stays `Idle` until [`Self::offer`].
    pub fn outgoing(
        local_user: UserId,
        local_name: impl Into<String>,
        remote_user: UserId,
        media_kind: CallMediaKind,
    ) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            remote_user,
            media_kind,
            role: CallRole::Caller,
            phase: CallPhase::Idle,
            pending_offer: None,
            local_candidates: CandidateBuffer::new(),
            remote_candidates: CandidateBuffer::new(),
        }
    }

    /// Register an incoming attempt from a received offer.  Rings until the
    /// local user accepts or rejects.
    pub fn incoming(
        local_user: UserId,
        local_name: impl Into<String>,
        remote_user: UserId,
        media_kind: CallMediaKind,
        offer: Value,
    ) -> Self {
        debug!(from = %remote_user.short(), kind = %media_kind, "incoming call");
        Self {
            local_user,
            local_name: local_name.into(),
            remote_user,
            media_kind,
            role: CallRole::Callee,
            phase: CallPhase::Ringing,
            pending_offer: Some(offer),
            local_candidates: CandidateBuffer::new(),
            remote_candidates: CandidateBuffer::new(),
        }
    }

    fn invalid(&self, attempted: &'static str) -> SignalError {
        SignalError::InvalidTransition {
            from: self.phase,
            attempted,
        }
    }

    /// Caller: send the offer.  Opens the local candidate path: anything
    /// gathered before this moment is flushed right behind the offer, and
    /// candidates from here on go out immediately.
    pub fn offer(&mut self, offer: Value) -> Result<(ClientEvent, Vec<ClientEvent>), SignalError> {
        if self.role != CallRole::Caller || self.phase != CallPhase::Idle {
            return Err(self.invalid("offer"));
        }
        self.phase = CallPhase::Offering;
        let flushed = self
            .local_candidates
            .drain()
            .into_iter()
            .map(|candidate| ClientEvent::IceCandidate {
                to: self.remote_user.to_string(),
                candidate,
            })
            .collect();
        debug!(to = %self.remote_user.short(), kind = %self.media_kind, "sending offer");

        let event = ClientEvent::CallUser {
            to: self.remote_user.to_string(),
            offer,
            media_kind: self.media_kind,
            caller_name: self.local_name.clone(),
        };
        Ok((event, flushed))
    }

    /// Callee: accept the ringing call with a produced answer.
    ///
    /// Returns the answer event, the offer to apply as the remote
    /// description, the remote candidates buffered so far (in arrival
    /// order), and the local candidates held while ringing.
    #[allow(clippy::type_complexity)]
    pub fn accept(
        &mut self,
        answer: Value,
    ) -> Result<(ClientEvent, Value, Vec<Value>, Vec<ClientEvent>), SignalError> {
        if self.role != CallRole::Callee || self.phase != CallPhase::Ringing {
            return Err(self.invalid("accept"));
        }
        let offer = self.pending_offer.take().ok_or(self.invalid("accept"))?;
        self.phase = CallPhase::Accepted;

        // Remote description is being applied now: release both buffers.
        let remote = self.remote_candidates.drain();
        let flushed = self
            .local_candidates
            .drain()
            .into_iter()
            .map(|candidate| ClientEvent::IceCandidate {
                to: self.remote_user.to_string(),
                candidate,
            })
            .collect();

        let event = ClientEvent::WebrtcAnswer {
            to: self.remote_user.to_string(),
            answer,
        };
        Ok((event, offer, remote, flushed))
    }

    /// Callee: decline the ringing call.
    pub fn reject(&mut self) -> Result<ClientEvent, SignalError> {
        if self.role != CallRole::Callee || self.phase != CallPhase::Ringing {
            return Err(self.invalid("reject"));
        }
        self.phase = CallPhase::Rejected;
        Ok(ClientEvent::CallRejected {
            to: self.remote_user.to_string(),
        })
    }

    /// Caller: give up on an unanswered offer.  The relay enforces no ring
    /// timeout; expiring an attempt is the caller's job.
    pub fn timed_out(&mut self) -> Result<(), SignalError> {
        if self.role != CallRole::Caller || self.phase != CallPhase::Offering {
            return Err(self.invalid("timed_out"));
        }
        self.phase = CallPhase::TimedOut;
        Ok(())
    }

    /// Media path is up.
    pub fn connected(&mut self) -> Result<(), SignalError> {
        if !matches!(self.phase, CallPhase::Answered | CallPhase::Accepted) {
            return Err(self.invalid("connected"));
        }
        self.phase = CallPhase::Connected;
        Ok(())
    }

    /// Hang up locally.
    pub fn end(&mut self, duration: i64) -> Result<ClientEvent, SignalError> {
        if self.phase.is_terminal() {
            return Err(self.invalid("end"));
        }
        self.phase = CallPhase::Ended;
        Ok(ClientEvent::EndCall {
            to: self.remote_user.to_string(),
            media_kind: self.media_kind,
            duration,
        })
    }

    /// Offer a locally gathered candidate.  Either goes out now or waits
    /// for the signaling path to open (callee side, while ringing).
    pub fn local_candidate(&mut self, candidate: Value) -> Option<ClientEvent> {
        match self.local_candidates.push(candidate) {
            CandidateDisposition::Immediate(candidate) => Some(ClientEvent::IceCandidate {
                to: self.remote_user.to_string(),
                candidate,
            }),
            CandidateDisposition::Buffered => None,
        }
    }

    /// Feed a remote signaling event to the session.
    pub fn handle_remote(&mut self, event: &ServerEvent) -> SignalingAction {
        match event {
            ServerEvent::WebrtcAnswer { from, answer } => {
                if *from != self.remote_user
                    || self.role != CallRole::Caller
                    || self.phase != CallPhase::Offering
                {
                    return SignalingAction::Ignore;
                }
                self.phase = CallPhase::Answered;
                debug!(from = %from.short(), "answer received");

                // The answer is the remote description: buffered remote
                // candidates become appliable, in arrival order.
                SignalingAction::ApplyRemoteDescription {
                    description: answer.clone(),
                    candidates: self.remote_candidates.drain(),
                }
            }
            ServerEvent::IceCandidate { from, candidate } => {
                if *from != self.remote_user || self.phase.is_terminal() {
                    return SignalingAction::Ignore;
                }
                match self.remote_candidates.push(candidate.clone()) {
                    CandidateDisposition::Immediate(c) => SignalingAction::ApplyCandidate(c),
                    CandidateDisposition::Buffered => SignalingAction::CandidateBuffered,
                }
            }
            ServerEvent::CallRejected { from } => {
                if *from != self.remote_user || self.phase.is_terminal() {
                    return SignalingAction::Ignore;
                }
                self.phase = CallPhase::Rejected;
                SignalingAction::Rejected
            }
            ServerEvent::EndCall { from } => {
                if *from != self.remote_user || self.phase.is_terminal() {
                    return SignalingAction::Ignore;
                }
                self.phase = CallPhase::Ended;
                SignalingAction::Ended
            }
            _ => SignalingAction::Ignore,
        }
    }
}
