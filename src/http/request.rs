//! Request model filled in by the parser.
//!
//! # Responsibilities
//! - Hold the parsed request line, headers and body
//! - Carry the requirements the response creator imposes on a request
//!   (accepted methods, mandatory header values, JSON body)
//! - Validate the parsed request against those requirements on finalize
//!
//! # Design Decisions
//! - The response creator hands out empty requests, so every connection
//!   parses into the shape its creator expects
//! - Validation failures are [`RequestError`]s; the connection turns them
//!   into 400 responses and never propagates them further

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Version};
use thiserror::Error;

/// A request that could not be parsed or does not meet requirements.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request line or header block is not valid HTTP/1.x.
    #[error("malformed request head: {0}")]
    Head(String),

    /// The header block exceeds the size limit.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The declared body exceeds the size limit.
    #[error("request body of {length} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// Declared content length.
        length: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The `Content-Length` header is missing a usable value.
    #[error("invalid Content-Length header")]
    ContentLength,

    /// Transfer codings are not supported on the control channel.
    #[error("unsupported Transfer-Encoding")]
    TransferEncoding,

    /// The method is not accepted by this request type.
    #[error("method {0} not allowed")]
    Method(Method),

    /// A header required by this request type is missing or has another value.
    #[error("header {name} must be {expected:?}")]
    Header {
        /// Header name.
        name: HeaderName,
        /// Value the request type requires.
        expected: String,
    },

    /// The body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    Json(String),
}

/// Fields produced by the parser.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request method.
    pub method: Option<Method>,
    /// Request target as sent.
    pub uri: String,
    /// HTTP version, known as soon as the request line is complete.
    pub version: Option<Version>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Requirements {
    methods: Vec<Method>,
    headers: Vec<(HeaderName, HeaderValue)>,
    json_body: bool,
}

/// HTTP request received on a control connection.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    context: RequestContext,
    requirements: Requirements,
    json: Option<serde_json::Value>,
    finalized: bool,
}

impl HttpRequest {
    /// A request with no requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request that must be a `POST` with a JSON body.
    pub fn post_json() -> Self {
        Self::new()
            .require_method(Method::POST)
            .require_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .require_json_body()
    }

    /// Accept `method`. Without any call every method is accepted.
    pub fn require_method(mut self, method: Method) -> Self {
        self.requirements.methods.push(method);
        self
    }

    /// Require header `name` to be present with `value` (case-insensitive).
    pub fn require_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.requirements.headers.push((name, value));
        self
    }

    /// Require the body to parse as JSON.
    pub fn require_json_body(mut self) -> Self {
        self.requirements.json_body = true;
        self
    }

    /// Parsed fields.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    /// Request method, once parsed.
    pub fn method(&self) -> Option<&Method> {
        self.context.method.as_ref()
    }

    /// Request target, once parsed.
    pub fn uri(&self) -> &str {
        &self.context.uri
    }

    /// HTTP version, once the request line has been seen.
    pub fn version(&self) -> Option<Version> {
        self.context.version
    }

    /// Value of header `name` if present and valid UTF-8.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.context.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw request body.
    pub fn body(&self) -> &[u8] {
        &self.context.body
    }

    /// Parsed JSON body, available after a successful finalize of a request
    /// that requires one.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    /// Whether [`finalize`](Self::finalize) succeeded.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Check the parsed request against its requirements.
    pub fn finalize(&mut self) -> Result<(), RequestError> {
        let requirements = &self.requirements;

        if let Some(method) = &self.context.method {
            if !requirements.methods.is_empty() && !requirements.methods.contains(method) {
                return Err(RequestError::Method(method.clone()));
            }
        }

        for (name, expected) in &requirements.headers {
            let matches = self
                .context
                .headers
                .get(name)
                .map(|actual| header_value_matches(actual, expected))
                .unwrap_or(false);
            if !matches {
                return Err(RequestError::Header {
                    name: name.clone(),
                    expected: expected.to_str().unwrap_or_default().to_string(),
                });
            }
        }

        if requirements.json_body {
            let value = serde_json::from_slice(&self.context.body)
                .map_err(|e| RequestError::Json(e.to_string()))?;
            self.json = Some(value);
        }

        self.finalized = true;
        Ok(())
    }
}

/// Compare media-type-like values, ignoring case and parameters.
fn header_value_matches(actual: &HeaderValue, expected: &HeaderValue) -> bool {
    let (Ok(actual), Ok(expected)) = (actual.to_str(), expected.to_str()) else {
        return false;
    };
    let actual = actual.split(';').next().unwrap_or_default().trim();
    actual.eq_ignore_ascii_case(expected.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(content_type: &str, body: &str) -> HttpRequest {
        let mut request = HttpRequest::post_json();
        let ctx = request.context_mut();
        ctx.method = Some(Method::POST);
        ctx.uri = "/".into();
        ctx.version = Some(Version::HTTP_11);
        ctx.headers
            .insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        ctx.body = body.as_bytes().to_vec();
        request
    }

    #[test]
    fn json_request_finalizes() {
        let mut request = post("application/json", "{ }");
        request.finalize().unwrap();
        assert!(request.is_finalized());
        assert_eq!(request.json(), Some(&serde_json::json!({})));
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let mut request = post("Application/JSON; charset=utf-8", "[]");
        assert!(request.finalize().is_ok());
    }

    #[test]
    fn wrong_content_type_is_rejected() {
        let mut request = post("foo", "{ }");
        assert!(matches!(
            request.finalize(),
            Err(RequestError::Header { .. })
        ));
        assert!(!request.is_finalized());
    }

    #[test]
    fn invalid_json_is_rejected() {
        let mut request = post("application/json", "{ \"a\": abc }");
        assert!(matches!(request.finalize(), Err(RequestError::Json(_))));
    }

    #[test]
    fn method_requirement() {
        let mut request = post("application/json", "{}");
        request.context_mut().method = Some(Method::GET);
        assert_eq!(request.finalize(), Err(RequestError::Method(Method::GET)));
    }

    #[test]
    fn unconstrained_request_accepts_anything() {
        let mut request = HttpRequest::new();
        request.context_mut().method = Some(Method::DELETE);
        assert!(request.finalize().is_ok());
        assert!(request.json().is_none());
    }
}
