//! Protocol lifecycle of one engine instance
//!
//! A stateful engine moves Uninitialized -> Initializing -> Initialized and
//! accepts exactly one `initialize` in its lifetime. Stateless engines skip the
//! handshake entirely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Engine lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Only `initialize` and `ping` are valid
    Uninitialized = 0,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initializing = 1,
    /// Normal operation
    Initialized = 2,
    /// No handshake required; every method is accepted
    Stateless = 3,
}

impl From<u8> for SessionPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => SessionPhase::Initializing,
            2 => SessionPhase::Initialized,
            3 => SessionPhase::Stateless,
            _ => SessionPhase::Uninitialized,
        }
    }
}

/// Shared lifecycle state, cloned into every request the engine handles.
#[derive(Clone)]
pub struct SessionState {
    phase: Arc<AtomicU8>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A stateful engine awaiting its handshake
    pub fn new() -> Self {
        Self::with_phase(SessionPhase::Uninitialized)
    }

    /// An engine that serves requests without a handshake
    pub fn stateless() -> Self {
        Self::with_phase(SessionPhase::Stateless)
    }

    fn with_phase(phase: SessionPhase) -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(phase as u8)),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Initialized | SessionPhase::Stateless
        )
    }

    /// Uninitialized -> Initializing.
    ///
    /// Returns false when the engine already saw an `initialize`; the caller
    /// must reject the request. Stateless engines always accept.
    pub fn mark_initializing(&self) -> bool {
        if self.phase() == SessionPhase::Stateless {
            return true;
        }
        self.phase
            .compare_exchange(
                SessionPhase::Uninitialized as u8,
                SessionPhase::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Initializing -> Initialized, on `notifications/initialized`.
    pub fn mark_initialized(&self) -> bool {
        self.phase
            .compare_exchange(
                SessionPhase::Initializing as u8,
                SessionPhase::Initialized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Before the handshake only `initialize` and `ping` are allowed.
    pub fn is_request_allowed(&self, method: &str) -> bool {
        match self.phase() {
            SessionPhase::Uninitialized => matches!(method, "initialize" | "ping"),
            _ => true,
        }
    }
}
