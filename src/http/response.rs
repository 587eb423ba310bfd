//! Response model and wire serialization.
//!
//! # Responsibilities
//! - Build responses for the dynamic and stock paths
//! - Render the minimal JSON body used for stock error responses
//! - Serialize status line, `Content-Length`, `Content-Type`, `Date`,
//!   optional extra headers, the empty separator line and the body
//!
//! # Design Decisions
//! - `Content-Length` is always computed from the body, never set by callers
//! - The `Date` value is chosen by the response creator so tests can pin it

use chrono::{DateTime, Utc};
use http::header::HeaderMap;
use http::{StatusCode, Version};

/// Media type of every response body produced on the control channel.
pub const APPLICATION_JSON: &str = "application/json";

/// Format `time` as an HTTP date (RFC 7231 IMF-fixdate).
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The current time as an HTTP date.
pub fn http_date_now() -> String {
    http_date(Utc::now())
}

/// Render `version` the way it appears in a status line.
pub fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Body of a stock response: `{ "result": <code>, "text": "<Reason>" }`.
pub fn stock_body(status: StatusCode) -> String {
    format!(
        "{{ \"result\": {}, \"text\": \"{}\" }}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

/// HTTP response ready to be written to a control connection.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: Version,
    status: StatusCode,
    content_type: String,
    date: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponse {
    /// Empty JSON response dated now.
    pub fn new(version: Version, status: StatusCode) -> Self {
        Self {
            version,
            status,
            content_type: APPLICATION_JSON.to_string(),
            date: http_date_now(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Stock response with the minimal JSON body describing `status`.
    pub fn stock(version: Version, status: StatusCode) -> Self {
        Self::new(version, status).with_body(stock_body(status))
    }

    /// Replace the body with `value` serialized as JSON.
    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string())
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace the `Content-Type` value.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Replace the `Date` value.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    /// Extra headers emitted after `Date`.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Protocol version of the status line.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialize into wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}\r\n",
            version_text(self.version),
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or_default()
        );
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str(&format!("Content-Type: {}\r\n", self.content_type));
        head.push_str(&format!("Date: {}\r\n", self.date));
        for (name, value) in &self.headers {
            head.push_str(&format!(
                "{}: {}\r\n",
                name,
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
