//! Signal queue bridging OS signals onto the reactor.
//!
//! # Responsibilities
//! - Correlate a sequence id with a pending signal number
//! - Schedule the handler for every queued signal on the reactor loop
//! - Absorb handler failures so the loop keeps running
//!
//! # Design Decisions
//! - Entries live in a registry keyed by sequence id; handlers receive the
//!   id and pop the entry themselves, so a handler may push new signals
//! - Sequence ids come from the counter owned by the reactor, so every
//!   queue on the same reactor draws from one monotonic sequence
//! - Capture only pushes; all handler work runs on the loop thread

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::observability::metrics;
use crate::reactor::ReactorHandle;

/// Sequence id assigned to a queued signal.
pub type SignalId = u64;

/// Error a signal handler may report.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback run on the reactor for a queued signal.
pub type SignalHandler = Arc<dyn Fn(SignalId) -> Result<(), HandlerError> + Send + Sync>;

/// Error type for signal queue operations.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The queue is bound to a reactor that no longer exists.
    #[error("signal queue has no reactor")]
    NoReactor,

    /// No pending entry has this id.
    #[error("signal {0} not found")]
    NotFound(SignalId),

    /// The OS refused to deliver this signal to us.
    #[error("cannot capture signal {signum}: {source}")]
    Capture {
        /// Signal number.
        signum: i32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// A signal waiting for its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSignal {
    sequence_id: SignalId,
    signum: i32,
}

impl IoSignal {
    /// Id assigned when the signal was pushed.
    pub fn sequence_id(&self) -> SignalId {
        self.sequence_id
    }

    /// OS signal number.
    pub fn signum(&self) -> i32 {
        self.signum
    }
}

/// Registry of pending signals for one reactor.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct SignalQueue {
    reactor: ReactorHandle,
    entries: Arc<Mutex<BTreeMap<SignalId, IoSignal>>>,
}

impl SignalQueue {
    /// Create a queue scheduling handlers on `reactor`.
    pub fn new(reactor: &ReactorHandle) -> Result<Self, SignalError> {
        if reactor.is_closed() {
            return Err(SignalError::NoReactor);
        }

        Ok(Self {
            reactor: reactor.clone(),
            entries: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Queue `signum` and schedule `handler` with its new sequence id.
    pub fn push_signal(&self, signum: i32, handler: SignalHandler) -> Result<SignalId, SignalError> {
        let sequence_id = self.reactor.sequence().next();
        self.entries().insert(
            sequence_id,
            IoSignal {
                sequence_id,
                signum,
            },
        );

        let scheduled = self
            .reactor
            .post(move || trampoline(sequence_id, signum, &handler));
        if scheduled.is_err() {
            self.entries().remove(&sequence_id);
            return Err(SignalError::NoReactor);
        }

        tracing::trace!(sequence_id, signum, "Signal queued");
        Ok(sequence_id)
    }

    /// Remove and return the entry for `sequence_id`.
    pub fn pop_signal(&self, sequence_id: SignalId) -> Result<IoSignal, SignalError> {
        self.entries()
            .remove(&sequence_id)
            .ok_or(SignalError::NotFound(sequence_id))
    }

    /// Drop every pending entry. Already scheduled handlers still run.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of entries not yet popped.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether every pushed entry has been popped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<SignalId, IoSignal>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SignalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalQueue")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

fn trampoline(sequence_id: SignalId, signum: i32, handler: &SignalHandler) {
    metrics::record_signal(signum);

    match panic::catch_unwind(AssertUnwindSafe(|| handler(sequence_id))) {
        Ok(Ok(())) => tracing::trace!(sequence_id, signum, "Signal handled"),
        Ok(Err(e)) => tracing::error!(sequence_id, signum, error = %e, "Signal handler failed"),
        Err(payload) => tracing::error!(
            sequence_id,
            signum,
            panic = panic_message(payload.as_ref()),
            "Signal handler panicked"
        ),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
