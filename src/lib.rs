//! Control channel for the DHCP daemon family.
//!
//! A single-threaded reactor drives an HTTP/1.x listener that accepts JSON
//! control commands, along with interval timers and a signal queue that
//! moves OS signal handling onto the loop thread.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod reactor;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::DaemonConfig;
pub use lifecycle::Daemon;
pub use net::Listener;
pub use reactor::{Reactor, ReactorHandle};
