//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Reactor → Listener → Signal capture → Run
//!
//! Signals:
//!     OS delivery → capture.rs (on-receipt, push only)
//!     → signals.rs (queue entry, trampoline posted to the reactor)
//!     → handler on the loop thread:
//!         SIGTERM/SIGINT → stop the reactor
//!         SIGHUP → reload configuration
//!
//! Shutdown:
//!     Reactor stops → Signal capture cleared → Listener stopped → Exit
//! ```
//!
//! # Design Decisions
//! - Handlers never run in the capture path
//! - Handler failures are logged and absorbed at the trampoline
//! - Shutdown closes sockets without draining them

pub mod capture;
pub mod signals;
pub mod startup;

pub use capture::SignalSet;
pub use signals::{IoSignal, SignalError, SignalHandler, SignalId, SignalQueue};
pub use startup::{Daemon, ReloadError, StartupError};
