//! Incremental HTTP/1.x request parser.
//!
//! The connection appends every read to its receive buffer and calls
//! [`RequestParser::parse`] with the whole buffer. The head is parsed with
//! `httparse` once it is complete; the body is then collected by
//! `Content-Length`.

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Version};

use super::request::{HttpRequest, RequestError};

/// Largest accepted request head, request line included.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Largest number of header fields in one request.
pub const MAX_HEADERS: usize = 64;

/// Outcome of feeding the receive buffer to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed.
    NeedData,
    /// The request is complete and satisfies its requirements.
    Complete,
    /// The request can never become valid.
    Malformed(RequestError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Stage {
    #[default]
    Head,
    Body {
        head_len: usize,
        content_length: usize,
    },
    Done,
}

/// Parser state for one request cycle.
#[derive(Debug, Clone)]
pub struct RequestParser {
    stage: Stage,
    max_body_size: usize,
}

impl RequestParser {
    /// Create a parser that rejects bodies larger than `max_body_size`.
    pub fn new(max_body_size: usize) -> Self {
        Self {
            stage: Stage::Head,
            max_body_size,
        }
    }

    /// Forget the current request so the parser can start a new cycle.
    pub fn reset(&mut self) {
        self.stage = Stage::Head;
    }

    /// Parse as much of `buffer` as possible into `request`.
    pub fn parse(&mut self, buffer: &[u8], request: &mut HttpRequest) -> ParseStatus {
        loop {
            match self.stage {
                Stage::Head => {
                    if request.version().is_none() {
                        request.context_mut().version = sniff_version(buffer);
                    }
                    match self.parse_head(buffer, request) {
                        Ok(Some(stage)) => self.stage = stage,
                        Ok(None) => return ParseStatus::NeedData,
                        Err(e) => return ParseStatus::Malformed(e),
                    }
                }
                Stage::Body {
                    head_len,
                    content_length,
                } => {
                    let end = head_len + content_length;
                    if buffer.len() < end {
                        return ParseStatus::NeedData;
                    }
                    request.context_mut().body = buffer[head_len..end].to_vec();
                    self.stage = Stage::Done;
                    return match request.finalize() {
                        Ok(()) => ParseStatus::Complete,
                        Err(e) => ParseStatus::Malformed(e),
                    };
                }
                Stage::Done => return ParseStatus::Complete,
            }
        }
    }

    fn parse_head(&self, buffer: &[u8], request: &mut HttpRequest) -> Result<Option<Stage>, RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);

        let head_len = match parsed.parse(buffer) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if buffer.len() > MAX_HEAD_SIZE {
                    return Err(RequestError::HeadTooLarge(MAX_HEAD_SIZE));
                }
                return Ok(None);
            }
            Err(e) => return Err(RequestError::Head(e.to_string())),
        };
        if head_len > MAX_HEAD_SIZE {
            return Err(RequestError::HeadTooLarge(MAX_HEAD_SIZE));
        }

        let ctx = request.context_mut();
        ctx.method = parsed
            .method
            .map(|m| Method::from_bytes(m.as_bytes()))
            .transpose()
            .map_err(|e| RequestError::Head(e.to_string()))?;
        ctx.uri = parsed.path.unwrap_or_default().to_string();
        ctx.version = match parsed.version {
            Some(0) => Some(Version::HTTP_10),
            Some(1) => Some(Version::HTTP_11),
            _ => return Err(RequestError::Head("unsupported HTTP version".into())),
        };
        ctx.headers.clear();
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| RequestError::Head(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| RequestError::Head(e.to_string()))?;
            ctx.headers.append(name, value);
        }

        if ctx.headers.contains_key(TRANSFER_ENCODING) {
            return Err(RequestError::TransferEncoding);
        }
        let content_length = match ctx.headers.get(CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(RequestError::ContentLength)?,
            None => 0,
        };
        if content_length > self.max_body_size {
            return Err(RequestError::BodyTooLarge {
                length: content_length,
                limit: self.max_body_size,
            });
        }

        Ok(Some(Stage::Body {
            head_len,
            content_length,
        }))
    }
}

/// Read the HTTP version from a complete request line, before the rest of
/// the head is available.
fn sniff_version(buffer: &[u8]) -> Option<Version> {
    let line_end = buffer.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&buffer[..line_end]).ok()?;
    match line.split_ascii_whitespace().last()? {
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/1.1" => Some(Version::HTTP_11),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    fn feed(chunks: &[&str]) -> (ParseStatus, HttpRequest) {
        let mut parser = RequestParser::new(LIMIT);
        let mut request = HttpRequest::post_json();
        let mut buffer = Vec::new();
        let mut status = ParseStatus::NeedData;
        for chunk in chunks {
            buffer.extend_from_slice(chunk.as_bytes());
            status = parser.parse(&buffer, &mut request);
        }
        (status, request)
    }

    #[test]
    fn complete_request_in_one_read() {
        let (status, request) = feed(&[
            "POST /foo/bar HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 3\r\n\r\n{ }",
        ]);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.uri(), "/foo/bar");
        assert_eq!(request.version(), Some(Version::HTTP_11));
        assert_eq!(request.body(), b"{ }");
    }

    #[test]
    fn request_split_across_reads() {
        let (status, request) = feed(&[
            "POST /x HT",
            "TP/1.0\r\nContent-Type: application/json\r\n",
            "Content-Length: 2\r\n\r\n{",
            "}",
        ]);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.version(), Some(Version::HTTP_10));
    }

    #[test]
    fn version_known_before_head_completes() {
        let (status, request) =
            feed(&["POST /foo/bar HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length:"]);
        assert_eq!(status, ParseStatus::NeedData);
        assert_eq!(request.version(), Some(Version::HTTP_11));
    }

    #[test]
    fn bad_content_type_is_malformed() {
        let (status, request) =
            feed(&["POST /foo/bar HTTP/1.1\r\nContent-Type: foo\r\nContent-Length: 3\r\n\r\n{ }"]);
        assert!(matches!(
            status,
            ParseStatus::Malformed(RequestError::Header { .. })
        ));
        assert_eq!(request.version(), Some(Version::HTTP_11));
    }

    #[test]
    fn garbage_has_no_version() {
        let (status, request) = feed(&["\x01\x02 nonsense\r\n\r\n"]);
        assert!(matches!(status, ParseStatus::Malformed(RequestError::Head(_))));
        assert_eq!(request.version(), None);
    }

    #[test]
    fn oversized_body_is_rejected_early() {
        let (status, _) = feed(&[
            "POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 4096\r\n\r\n",
        ]);
        assert_eq!(
            status,
            ParseStatus::Malformed(RequestError::BodyTooLarge {
                length: 4096,
                limit: LIMIT
            })
        );
    }

    #[test]
    fn chunked_body_is_rejected() {
        let (status, _) = feed(&[
            "POST / HTTP/1.1\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n",
        ]);
        assert_eq!(status, ParseStatus::Malformed(RequestError::TransferEncoding));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let long = format!("POST / HTTP/1.1\r\nX-Filler: {}", "a".repeat(MAX_HEAD_SIZE));
        let (status, _) = feed(&[&long]);
        assert_eq!(
            status,
            ParseStatus::Malformed(RequestError::HeadTooLarge(MAX_HEAD_SIZE))
        );
    }

    #[test]
    fn reset_starts_a_new_cycle() {
        let mut parser = RequestParser::new(LIMIT);
        let mut request = HttpRequest::post_json();
        let first = b"POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        assert_eq!(parser.parse(first, &mut request), ParseStatus::Complete);

        parser.reset();
        let mut request = HttpRequest::post_json();
        assert_eq!(parser.parse(b"POST", &mut request), ParseStatus::NeedData);
    }
}
