//! OS signal capture.
//!
//! A [`SignalSet`] listens for a fixed set of signal numbers and calls its
//! on-receipt notifier once per delivery. The notifier should only push the
//! signal onto a [`SignalQueue`](super::signals::SignalQueue) and return.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use super::signals::SignalError;
use crate::reactor::ReactorHandle;

/// Captures a set of OS signals for the lifetime of the value.
pub struct SignalSet {
    signals: Vec<i32>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalSet {
    /// Start capturing `signals`, invoking `on_receipt(signum)` for each.
    ///
    /// A `false` return from `on_receipt` means the signal was dropped.
    /// Deliveries of one signal that arrive before it was observed may be
    /// coalesced by the OS.
    pub fn new<F>(reactor: &ReactorHandle, signals: &[i32], on_receipt: F) -> Result<Self, SignalError>
    where
        F: Fn(i32) -> bool + Send + Sync + 'static,
    {
        let on_receipt = Arc::new(on_receipt);
        let _runtime = reactor.runtime().enter();
        let mut set = Self {
            signals: Vec::with_capacity(signals.len()),
            tasks: Vec::with_capacity(signals.len()),
        };

        for &signum in signals {
            let mut stream = signal(SignalKind::from_raw(signum))
                .map_err(|source| SignalError::Capture { signum, source })?;
            let on_receipt = Arc::clone(&on_receipt);

            set.tasks.push(reactor.spawn(async move {
                while stream.recv().await.is_some() {
                    if !on_receipt(signum) {
                        tracing::warn!(signum, "Signal dropped");
                    }
                }
            }));
            set.signals.push(signum);
        }

        tracing::debug!(signals = ?set.signals, "Signal capture installed");
        Ok(set)
    }

    /// Signal numbers being captured.
    pub fn signals(&self) -> &[i32] {
        &self.signals
    }

    /// Stop capturing. Idempotent.
    pub fn clear(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.signals.clear();
    }
}

impl Drop for SignalSet {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSet")
            .field("signals", &self.signals)
            .finish()
    }
}
