//! JSON control commands served by the daemon.
//!
//! Requests are `POST` with `{"command": "<name>", "arguments": {...}}`.
//! Every answer is a 200 response carrying
//! `{"result": <code>, "text": "...", "arguments": {...}}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use super::creator::{response_version, ResponseCreator, ResponseCreatorFactory};
use super::request::HttpRequest;
use super::response::HttpResponse;
use crate::reactor::ReactorHandle;

/// Command completed successfully.
pub const RESULT_SUCCESS: i64 = 0;
/// Command failed.
pub const RESULT_ERROR: i64 = 1;
/// Command is not known.
pub const RESULT_UNSUPPORTED: i64 = 2;

/// Commands understood by [`CommandResponseCreator`].
pub const COMMANDS: &[&str] = &["list-commands", "shutdown", "status-get", "version-get"];

#[derive(Debug, Deserialize)]
struct Command {
    command: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Daemon state visible to control commands.
#[derive(Debug)]
pub struct ControlState {
    started: Instant,
    reloads: AtomicU64,
    reactor: ReactorHandle,
}

impl ControlState {
    /// State for a daemon driven by `reactor`.
    pub fn new(reactor: ReactorHandle) -> Self {
        Self {
            started: Instant::now(),
            reloads: AtomicU64::new(0),
            reactor,
        }
    }

    /// Record a successful configuration reload.
    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful reloads since start.
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

/// Build the JSON answer envelope.
pub fn answer(result: i64, text: impl Into<String>, arguments: Option<Value>) -> Value {
    let mut answer = json!({ "result": result, "text": text.into() });
    if let Some(arguments) = arguments {
        answer["arguments"] = arguments;
    }
    answer
}

/// Response creator executing control commands.
#[derive(Debug)]
pub struct CommandResponseCreator {
    state: Arc<ControlState>,
    served: u64,
}

impl CommandResponseCreator {
    fn execute(&self, command: Command) -> Value {
        match command.command.as_str() {
            "list-commands" => answer(RESULT_SUCCESS, "", Some(json!(COMMANDS))),
            "version-get" => answer(
                RESULT_SUCCESS,
                env!("CARGO_PKG_VERSION"),
                Some(json!({ "extended": concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")) })),
            ),
            "status-get" => answer(
                RESULT_SUCCESS,
                "",
                Some(json!({
                    "pid": std::process::id(),
                    "uptime": self.state.started.elapsed().as_secs(),
                    "reload": self.state.reloads(),
                })),
            ),
            "shutdown" => {
                if let Some(arguments) = &command.arguments {
                    tracing::debug!(arguments = %arguments, "Ignoring shutdown arguments");
                }
                self.state.reactor.stop();
                answer(RESULT_SUCCESS, "Shutting down.", None)
            }
            other => answer(
                RESULT_UNSUPPORTED,
                format!("'{other}' command not supported."),
                None,
            ),
        }
    }
}

impl ResponseCreator for CommandResponseCreator {
    fn create_new_request(&self) -> HttpRequest {
        HttpRequest::post_json()
    }

    fn create_stock_response(&self, request: &HttpRequest, status: StatusCode) -> HttpResponse {
        HttpResponse::stock(response_version(request), status)
    }

    fn create_dynamic_response(&mut self, request: &HttpRequest) -> HttpResponse {
        self.served += 1;
        let body = match request.json().cloned().map(serde_json::from_value::<Command>) {
            Some(Ok(command)) => {
                tracing::info!(command = %command.command, served = self.served, "Control command received");
                self.execute(command)
            }
            Some(Err(e)) => answer(RESULT_ERROR, format!("invalid command: {e}"), None),
            None => answer(RESULT_ERROR, "missing command", None),
        };

        HttpResponse::new(response_version(request), StatusCode::OK).with_json(&body)
    }
}

/// Factory handing every connection its own [`CommandResponseCreator`].
#[derive(Debug, Clone)]
pub struct CommandResponseCreatorFactory {
    state: Arc<ControlState>,
}

impl CommandResponseCreatorFactory {
    /// Factory sharing `state` with every creator.
    pub fn new(state: Arc<ControlState>) -> Self {
        Self { state }
    }
}

impl ResponseCreatorFactory for CommandResponseCreatorFactory {
    fn create(&self) -> Box<dyn ResponseCreator> {
        Box::new(CommandResponseCreator {
            state: Arc::clone(&self.state),
            served: 0,
        })
    }
}
