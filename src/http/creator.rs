//! Response creator capability consumed by connections.

use http::{StatusCode, Version};

use super::request::HttpRequest;
use super::response::HttpResponse;

/// Produces requests to parse into and responses to send back.
///
/// One instance serves exactly one connection, so per-connection state never
/// leaks between clients.
pub trait ResponseCreator: Send {
    /// Empty request carrying the requirements of this creator.
    fn create_new_request(&self) -> HttpRequest;

    /// Response for a request that failed or timed out before completion.
    ///
    /// `request` may be only partially parsed.
    fn create_stock_response(&self, request: &HttpRequest, status: StatusCode) -> HttpResponse;

    /// Response for a complete, valid request.
    fn create_dynamic_response(&mut self, request: &HttpRequest) -> HttpResponse;
}

/// Builds one [`ResponseCreator`] per accepted connection.
pub trait ResponseCreatorFactory: Send + Sync {
    /// Create a creator for a new connection.
    fn create(&self) -> Box<dyn ResponseCreator>;
}

/// Version to answer with when the request may not have revealed one.
pub fn response_version(request: &HttpRequest) -> Version {
    request.version().unwrap_or(Version::HTTP_11)
}
