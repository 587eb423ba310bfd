//! Shared utilities for listener and daemon integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dhcp_ctrl::http::creator::response_version;
use dhcp_ctrl::http::{HttpRequest, HttpResponse, ResponseCreator, ResponseCreatorFactory};
use dhcp_ctrl::net::{IdleTimeout, Listener, RequestTimeout};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Fixed `Date` header value so responses can be compared byte for byte.
pub const DATE: &str = "Tue, 19 Dec 2016 18:53:35 GMT";

/// Loopback address the test listeners bind to.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Answers every valid request with an empty 200.
pub struct TestResponseCreator;

impl ResponseCreator for TestResponseCreator {
    fn create_new_request(&self) -> HttpRequest {
        HttpRequest::post_json()
    }

    fn create_stock_response(&self, request: &HttpRequest, status: StatusCode) -> HttpResponse {
        HttpResponse::stock(response_version(request), status).with_date(DATE)
    }

    fn create_dynamic_response(&mut self, request: &HttpRequest) -> HttpResponse {
        HttpResponse::new(response_version(request), StatusCode::OK).with_date(DATE)
    }
}

/// Factory for [`TestResponseCreator`].
pub struct TestResponseCreatorFactory;

impl ResponseCreatorFactory for TestResponseCreatorFactory {
    fn create(&self) -> Box<dyn ResponseCreator> {
        Box::new(TestResponseCreator)
    }
}

pub fn factory() -> Arc<dyn ResponseCreatorFactory> {
    Arc::new(TestResponseCreatorFactory)
}

/// Start a listener on an ephemeral loopback port of the current runtime.
pub fn start_listener(request_timeout_ms: u64, idle_timeout_ms: u64) -> Listener {
    let mut listener = Listener::new(
        tokio::runtime::Handle::current(),
        LOOPBACK,
        0,
        factory(),
        RequestTimeout::from_millis(request_timeout_ms),
        IdleTimeout::from_millis(idle_timeout_ms),
    )
    .unwrap();
    listener.start().unwrap();
    listener
}

pub async fn connect(listener: &Listener) -> TcpStream {
    TcpStream::connect(listener.local_addr().unwrap()).await.unwrap()
}

/// Read one response: the head up to the empty line plus `Content-Length` body bytes.
pub async fn read_response(stream: &mut TcpStream) -> String {
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];

    let complete = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(head_end) = find_head_end(&received) {
                let head = String::from_utf8_lossy(&received[..head_end]).to_string();
                if received.len() >= head_end + content_length(&head) {
                    return;
                }
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before response completed");
            received.extend_from_slice(&chunk[..n]);
        }
    })
    .await;
    assert!(complete.is_ok(), "timed out waiting for response");

    String::from_utf8(received).unwrap()
}

/// Send `request` and return the response.
pub async fn send(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    read_response(stream).await
}

/// A connection is alive when a short read neither sees EOF nor fails.
pub async fn is_connection_alive(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut byte)).await {
        Err(_) => true,
        Ok(Ok(n)) => n > 0,
        Ok(Err(_)) => false,
    }
}

/// Find a free loopback port by binding and releasing it.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(SocketAddr::new(LOOPBACK, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0)
}
