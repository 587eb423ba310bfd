//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection receive buffer
//!     → parser.rs (incremental head/body parsing via httparse)
//!     → request.rs (requirements check: method, Content-Type, JSON body)
//!     → creator.rs (dynamic response, or stock 400/408 response)
//!     → response.rs (status line, headers, JSON body → wire bytes)
//!     → Connection write loop
//! ```
//!
//! # Design Decisions
//! - Parsing and validation errors become stock responses, never errors
//!   returned to the listener
//! - A factory builds one response creator per connection
//! - command.rs is the daemon's own creator; others can be plugged in

pub mod command;
pub mod creator;
pub mod parser;
pub mod request;
pub mod response;

pub use creator::{ResponseCreator, ResponseCreatorFactory};
pub use parser::{ParseStatus, RequestParser};
pub use request::{HttpRequest, RequestError};
pub use response::HttpResponse;
