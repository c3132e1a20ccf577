//! HTTP/1.1 request parsing using the [`httparse`] crate.
//!
//! A [`Request`] is only produced once its whole `Content-Length` framed body
//! has arrived, so the body can be inspected for cache parameters and later
//! replayed to the origin from the same buffer.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("transfer encoding {encoding:?} is not supported")]
    UnsupportedTransferEncoding { encoding: String },
}

/// Request headers that have been parsed, before the body is known to be complete.
///
/// The server uses this to reject oversized requests from the declared
/// `Content-Length` without waiting for the body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    /// Byte offset of the body within the buffer.
    pub body_offset: usize,
    /// Declared body length (`0` when absent).
    pub content_length: usize,
}

impl Head {
    /// Total number of bytes the complete request occupies.
    pub fn total_len(&self) -> usize {
        self.body_offset.saturating_add(self.content_length)
    }
}

/// A fully buffered HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. The body is stored
/// as a reference-counted [`Bytes`] buffer, so cloning it for the origin
/// replay does not copy.
///
/// # Examples
///
/// ```
/// use edgecache::http::request::Request;
///
/// let raw = b"GET /v1/pdf?url=x&cache=true HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(consumed, raw.len());
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/v1/pdf");
/// assert_eq!(request.query_string(), Some("url=x&cache=true"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses only the request head, reporting where the body starts and how long it is.
    ///
    /// # Errors
    ///
    /// Same as [`Request::parse`], minus waiting for the body.
    pub fn parse_head(buf: &[u8]) -> Result<Head, RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let content_length = framing(raw_req.headers, body_offset)?;
        Ok(Head {
            body_offset,
            content_length,
        })
    }

    /// Parses a complete HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the number of bytes it consumed from
    /// `buf` (head plus `Content-Length` body). Any trailing bytes belong to
    /// the next pipelined request.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head or the body has not fully arrived.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number or is too large to address.
    /// - [`RequestError::UnsupportedTransferEncoding`]: the body is not `Content-Length` framed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let content_length = framing(raw_req.headers, body_offset)?;
        let end = body_offset + content_length;
        if buf.len() < end {
            return Err(RequestError::Incomplete);
        }

        let method: Method = match raw_req.method {
            Some(m) => match m.parse::<Method>() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let body = Bytes::copy_from_slice(&buf[body_offset..end]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            end,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the path followed by `?query` when a query string was present.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Returns the buffered request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }
}

// Resolves the body length from the framing headers. Only `Content-Length`
// framing is supported; a missing header means an empty body. The head plus
// the declared body must fit in a `usize`.
fn framing(headers: &[httparse::Header<'_>], body_offset: usize) -> Result<usize, RequestError> {
    let mut content_length = 0;

    for header in headers {
        if header.name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(RequestError::UnsupportedTransferEncoding {
                encoding: String::from_utf8_lossy(header.value).into_owned(),
            });
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            let raw = String::from_utf8_lossy(header.value);
            content_length = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|len| body_offset.checked_add(*len).is_some())
                .ok_or_else(|| RequestError::InvalidContentLength {
                    value: raw.to_string(),
                })?;
        }
    }

    Ok(content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, consumed) = Request::parse(raw).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert!(req.body().is_empty());
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /v1/screenshot?cache=true&format=png HTTP/1.1\r\nHost: e\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/v1/screenshot");
        assert_eq!(req.query_string(), Some("cache=true&format=png"));
        assert_eq!(req.path_and_query(), "/v1/screenshot?cache=true&format=png");
    }

    #[test]
    fn path_and_query_without_query() {
        let raw = b"GET /v1/pdf HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_string(), None);
        assert_eq!(req.path_and_query(), "/v1/pdf");
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn incomplete_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));

        let head = Request::parse_head(raw).unwrap();
        assert_eq!(head.content_length, 10);
        assert_eq!(head.total_len(), raw.len() + 5);
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n\r\n";
        let (req, consumed) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"hello");
        assert_eq!(&raw[consumed..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn binary_body_preserved() {
        let mut raw = b"POST /v1/scrape HTTP/1.1\r\nContent-Length: 4\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xff, 0x00, 0xfe, 0x7f]);
        let (req, _) = Request::parse(&raw).unwrap();
        assert_eq!(req.body().as_ref(), &[0xff, 0x00, 0xfe, 0x7f]);
    }

    #[test]
    fn overflowing_content_length_is_invalid() {
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\nhello",
            usize::MAX - 5
        );
        assert!(matches!(
            Request::parse_head(raw.as_bytes()),
            Err(RequestError::InvalidContentLength { .. })
        ));
        assert!(matches!(
            Request::parse(raw.as_bytes()),
            Err(RequestError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn total_len_saturates() {
        let head = Head {
            body_offset: 40,
            content_length: usize::MAX,
        };
        assert_eq!(head.total_len(), usize::MAX);
    }

    #[test]
    fn rejects_chunked_bodies() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::UnsupportedTransferEncoding { .. })
        ));
    }

    #[test]
    fn rejects_bad_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn keep_alive_http11_default() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }
}
