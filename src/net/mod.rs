//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection ownership)
//!     → connection.rs (request/idle timers, state machine)
//!     → HTTP layer (parser, response creator)
//!
//! Connection States:
//!     Accepting → ReadingRequest → Dispatching → WritingResponse
//!         → IdleWaiting → ReadingRequest ...   (persistent)
//!         → Closed                             (otherwise)
//! ```
//!
//! # Design Decisions
//! - Each connection is a task owned by the listener's accept loop
//! - Each connection tracked so the listener can report live counts
//! - Timeouts are armed per connection, never shared

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use listener::{IdleTimeout, Listener, ListenerError, RequestTimeout};
