//! # Inbox
//!
//! Latest-value slots shared between the network threads and the planning cycle. Only the most
//! recent planning request is kept: a newer request overwrites an older one that has not been
//! planned yet.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard};

use comms_if::msg::{chassis::ChassisTelemetry, planning::PlanningRequest};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Shared store of the latest inputs.
#[derive(Debug, Default)]
pub struct Inbox {
    inner: Mutex<InboxState>,
}

/// A request taken by the planning cycle, along with the generation it was taken at.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub request: PlanningRequest,

    /// Number of requests stored when the snapshot was taken.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct InboxState {
    request: Option<PlanningRequest>,

    /// Set when a request arrives, cleared once it has been handled.
    pending: bool,

    /// Incremented on every stored request.
    generation: u64,

    chassis: Option<ChassisTelemetry>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("The inbox lock is poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new request, replacing any previous one, and mark it pending.
    pub fn put_request(&self, request: PlanningRequest) -> Result<(), InboxError> {
        let mut state = self.lock()?;

        state.request = Some(request);
        state.pending = true;
        state.generation = state.generation.wrapping_add(1);

        Ok(())
    }

    /// Store the latest chassis telemetry.
    pub fn put_chassis(&self, chassis: ChassisTelemetry) -> Result<(), InboxError> {
        self.lock()?.chassis = Some(chassis);
        Ok(())
    }

    /// Whether a request is waiting to be planned.
    pub fn is_pending(&self) -> Result<bool, InboxError> {
        Ok(self.lock()?.pending)
    }

    /// Take a copy of the pending request.
    ///
    /// Returns `None` if no request is pending. The pending flag is left set, it is only cleared
    /// by [`Inbox::complete`].
    pub fn take_snapshot(&self) -> Result<Option<RequestSnapshot>, InboxError> {
        let state = self.lock()?;

        if !state.pending {
            return Ok(None);
        }

        Ok(state.request.as_ref().map(|r| RequestSnapshot {
            request: r.clone(),
            generation: state.generation,
        }))
    }

    /// Mark the snapshot's request as handled.
    ///
    /// The pending flag is only cleared if no newer request arrived since the snapshot was taken.
    /// Returns `true` if the flag was cleared.
    pub fn complete(&self, snapshot: &RequestSnapshot) -> Result<bool, InboxError> {
        let mut state = self.lock()?;

        if state.generation == snapshot.generation {
            state.pending = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// The most recent chassis telemetry, if any has been received.
    pub fn latest_chassis(&self) -> Result<Option<ChassisTelemetry>, InboxError> {
        Ok(self.lock()?.chassis)
    }

    fn lock(&self) -> Result<MutexGuard<InboxState>, InboxError> {
        self.inner.lock().map_err(|_| InboxError::Poisoned)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
