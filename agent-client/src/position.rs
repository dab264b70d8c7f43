//! Log position tracking across reconnects
//!
//! The tracker owns the `(instance id, sequence)` pair the client resumes
//! from. Sequence numbers only mean something within one agent instance, so a
//! restart or a buffer rollover turns the position back into a fresh
//! subscription rather than an error.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::Header;

/// Where the first successful cycle positions the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Only observations that arrive after the first `current`
    FromHead,
    /// Everything still retained in the agent's buffer
    FromBuffer,
    /// Continue after a sequence the caller already processed
    FromExplicitSequence(u64),
}

/// Snapshot of the tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerPosition {
    pub instance_id: u64,
    /// Zero means "replay from the head of the agent's buffer"
    pub last_sequence: u64,
    pub last_response_timestamp: Option<DateTime<Utc>>,
    /// `last_sequence` was handed to the caller, as opposed to naming the
    /// next sequence not yet seen
    pub delivered: bool,
}

impl ConsumerPosition {
    /// The `from` parameter of the next sample or stream request.
    pub fn next_request_sequence(&self) -> Option<u64> {
        match (self.last_sequence, self.delivered) {
            (0, _) => None,
            (seq, true) => Some(seq.saturating_add(1)),
            (seq, false) => Some(seq),
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    position: ConsumerPosition,
    initialized: bool,
}

/// Owns the consumer position; every mutation goes through one short lock.
#[derive(Debug, Default)]
pub struct PositionTracker {
    state: Mutex<TrackerState>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> ConsumerPosition {
        self.state.lock().position
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.lock().position.last_sequence
    }

    pub fn instance_id(&self) -> u64 {
        self.state.lock().position.instance_id
    }

    pub fn next_request_sequence(&self) -> Option<u64> {
        self.state.lock().position.next_request_sequence()
    }

    /// Whether `initialize` already ran since creation or the last reset.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Position the tracker from the first `current` header.
    pub fn initialize(&self, header: &Header, mode: ResumeMode) {
        let mut state = self.state.lock();
        match mode {
            ResumeMode::FromHead => {
                state.position.last_sequence = header.next_sequence;
                state.position.delivered = false;
            }
            ResumeMode::FromBuffer => {
                state.position.last_sequence = 0;
                state.position.delivered = false;
            }
            ResumeMode::FromExplicitSequence(sequence) => {
                state.position.last_sequence = sequence;
                state.position.delivered = sequence > 0;
            }
        }
        state.initialized = true;
        tracing::debug!(
            "Position initialized ({:?}) at sequence {}",
            mode,
            state.position.last_sequence
        );
    }

    /// Seed the tracker before the first request for an explicit resume.
    pub fn resume_at(&self, instance_id: u64, sequence: u64) {
        let mut state = self.state.lock();
        state.position.instance_id = instance_id;
        state.position.last_sequence = sequence;
        state.position.delivered = sequence > 0;
        state.initialized = true;
    }

    /// Record a response header. Returns `true` when it reveals an agent
    /// restart, in which case the position has been reset to zero.
    pub fn on_header_observed(&self, header: &Header) -> bool {
        let mut state = self.state.lock();
        let previous = state.position.instance_id;
        let restarted = previous != 0 && previous != header.instance_id;

        if restarted {
            tracing::info!(
                "Agent instance changed from {} to {}, resetting position",
                previous,
                header.instance_id
            );
            state.position.last_sequence = 0;
            state.position.delivered = false;
        }

        state.position.instance_id = header.instance_id;
        state.position.last_response_timestamp = Some(header.creation_time.unwrap_or_else(Utc::now));
        restarted
    }

    /// Check the position against the agent's retained buffer. Returns `true`
    /// when a non-zero position fell outside it and was reset.
    pub fn reconcile(&self, header: &Header) -> bool {
        let mut state = self.state.lock();
        let last = state.position.last_sequence;

        if !header.contains(last) {
            state.position.last_sequence = 0;
            state.position.delivered = false;
            if last != 0 {
                tracing::warn!(
                    "Sequence {} is outside the agent buffer {}, replaying from head",
                    last,
                    header
                );
                return true;
            }
        }
        false
    }

    /// Move the position forward to `max_observed`; never moves it back.
    pub fn advance(&self, max_observed: u64) {
        let mut state = self.state.lock();
        if max_observed >= state.position.last_sequence && max_observed > 0 {
            state.position.last_sequence = max_observed;
            state.position.delivered = true;
        }
    }

    /// Forget everything, including whether the tracker was initialized.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = TrackerState::default();
        tracing::debug!("Position reset");
    }
}
