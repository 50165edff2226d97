//! HTTP message types
//!
//! This module defines the core types for HTTP requests and responses.
//! Both are created empty once per worker slot and cleared between
//! requests, so their buffers are reused across keep-alive cycles.

use super::parser::{parse_query, percent_decode};
use super::{Error, Headers, Result, Status, CRLF};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// Parse method from its request-line token
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "PATCH" => Ok(Method::Patch),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// Methods that may be dispatched to a service route
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            Method::Get | Method::Head | Method::Post | Method::Put | Method::Patch | Method::Delete
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse `HTTP/X.Y`
    ///
    /// Only 1.0 and 1.1 are accepted; a well-formed but unsupported version
    /// and a malformed token both yield `InvalidVersion`.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn write_fields(buf: &mut BytesMut, headers: &Headers) {
    for (name, value) in headers.iter() {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF.as_bytes());
    }
    buf.put_slice(CRLF.as_bytes());
}

/// HTTP request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    expect_continue: bool,
    method: Method,
    url: String,
    path: String,
    version: Version,
    headers: Headers,
    query: Vec<(String, String)>,
    raw_query: String,
    fragment: String,
    body: BytesMut,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let mut request = HttpRequest {
            method,
            ..HttpRequest::default()
        };
        request.set_target(uri.into());
        request
    }

    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Reset to the empty state, keeping allocated capacity
    pub fn clear(&mut self) {
        self.expect_continue = false;
        self.method = Method::Get;
        self.url.clear();
        self.path.clear();
        self.version = Version::default();
        self.headers.clear();
        self.query.clear();
        self.raw_query.clear();
        self.fragment.clear();
        self.body.clear();
    }

    /// Store the request target and split it into path, query and fragment
    pub(crate) fn set_target(&mut self, url: String) {
        let (rest, fragment) = match url.split_once('#') {
            Some((rest, fragment)) => (rest, fragment),
            None => (url.as_str(), ""),
        };
        let (path, raw_query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };

        self.path = percent_decode(path, false);
        self.raw_query = raw_query.to_string();
        self.query = parse_query(raw_query);
        self.fragment = fragment.to_string();
        self.url = url;
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_expect_continue(&mut self, expect: bool) {
        self.expect_continue = expect;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw request target as sent on the request line
    pub fn uri(&self) -> &str {
        &self.url
    }

    /// Percent-decoded path component, used for routing
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Decoded query parameters in order of appearance
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First decoded value of query parameter `name`
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl AsRef<[u8]>) {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
    }

    pub(crate) fn body_and_headers_mut(&mut self) -> (&mut BytesMut, &mut Headers) {
        (&mut self.body, &mut self.headers)
    }

    /// Declared `Content-Length`, if any
    pub fn content_length(&self) -> Result<Option<usize>> {
        content_length(&self.headers)
    }

    /// Whether the body uses chunked transfer coding
    pub fn is_chunked(&self) -> bool {
        self.headers.has_token("Transfer-Encoding", "chunked")
    }

    /// Whether a body follows the head
    pub fn expects_body(&self) -> bool {
        self.is_chunked() || matches!(self.content_length(), Ok(Some(n)) if n > 0)
    }

    /// Keep-alive intent of the client
    ///
    /// HTTP/1.1 is persistent unless `Connection: close`; HTTP/1.0 only
    /// with `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }

    /// Serialize request line and headers
    pub fn write_head(&self, buf: &mut BytesMut) {
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.url.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.version.as_str().as_bytes());
        buf.put_slice(CRLF.as_bytes());
        write_fields(buf, &self.headers);
    }

    /// Convert the request to wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        self.write_head(&mut buf);
        buf.put_slice(&self.body);
        buf.to_vec()
    }
}

pub(crate) fn content_length(headers: &Headers) -> Result<Option<usize>> {
    match headers.get("Content-Length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", value))),
        None => Ok(None),
    }
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpRequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> HttpRequest {
        let mut request = HttpRequest::new(
            self.method.unwrap_or_default(),
            self.uri.unwrap_or_else(|| "/".to_string()),
        );
        request.version = self.version.unwrap_or_default();
        request.headers = self.headers;
        request.body = BytesMut::from(&self.body[..]);
        request
    }
}

/// HTTP response
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    version: Version,
    status: Status,
    reason: Option<String>,
    headers: Headers,
    body: BytesMut,
}

impl HttpResponse {
    pub fn new(status: Status) -> Self {
        HttpResponse {
            status,
            ..HttpResponse::default()
        }
    }

    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    /// Reset to the empty state, keeping allocated capacity
    pub fn clear(&mut self) {
        self.version = Version::default();
        self.status = Status::UNSET;
        self.reason = None;
        self.headers.clear();
        self.body.clear();
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the status and drop any custom reason phrase
    pub fn set_status(&mut self, status: impl Into<Status>) {
        self.status = status.into();
        self.reason = None;
    }

    /// Reason phrase: the custom one if set, otherwise the table entry
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl AsRef<[u8]>) {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
    }

    pub(crate) fn body_and_headers_mut(&mut self) -> (&mut BytesMut, &mut Headers) {
        (&mut self.body, &mut self.headers)
    }

    pub fn content_length(&self) -> Result<Option<usize>> {
        content_length(&self.headers)
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.has_token("Transfer-Encoding", "chunked")
    }

    /// Serialize status line and headers
    pub fn write_head(&self, buf: &mut BytesMut) {
        buf.put_slice(self.version.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(format!("{:03}", self.status.code()).as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.reason().as_bytes());
        buf.put_slice(CRLF.as_bytes());
        write_fields(buf, &self.headers);
    }

    /// Convert the response to wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        self.write_head(&mut buf);
        buf.put_slice(&self.body);
        buf.to_vec()
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponseBuilder {
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> HttpResponse {
        HttpResponse {
            version: self.version.unwrap_or_default(),
            status: self.status.unwrap_or(Status::OK),
            reason: self.reason,
            headers: self.headers,
            body: BytesMut::from(&self.body[..]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!(Method::from_str("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_str("PATCH").unwrap(), Method::Patch);
        assert!(Method::from_str("get").is_err());
        assert!(Method::Delete.is_dispatchable());
        assert!(!Method::Options.is_dispatchable());
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!(Version::from_str("HTTP/1.0").unwrap(), Version::Http10);
        assert_eq!(Version::from_str("HTTP/1.1").unwrap(), Version::Http11);
        assert!(Version::from_str("HTTP/2.0").is_err());
        assert!(Version::from_str("HTTX/1.1").is_err());
    }

    #[test]
    fn test_target_split() {
        let req = HttpRequest::new(Method::Get, "/svc/a%20b?x=1&y=two+words&x=3#frag");
        assert_eq!(req.path(), "/svc/a b");
        assert_eq!(req.raw_query(), "x=1&y=two+words&x=3");
        assert_eq!(req.query_param("x"), Some("1"));
        assert_eq!(req.query_param("y"), Some("two words"));
        assert_eq!(req.query().len(), 3);
        assert_eq!(req.fragment(), "frag");
        assert_eq!(req.uri(), "/svc/a%20b?x=1&y=two+words&x=3#frag");
    }

    #[test]
    fn test_keep_alive_defaults() {
        let mut req = HttpRequest::builder().build();
        assert!(req.keep_alive());
        req.headers_mut().insert("Connection", "close");
        assert!(!req.keep_alive());

        let mut req = HttpRequest::builder().version(Version::Http10).build();
        assert!(!req.keep_alive());
        req.headers_mut().insert("Connection", "Keep-Alive");
        assert!(req.keep_alive());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut req = HttpRequest::builder()
            .method(Method::Post)
            .uri("/a?b=c")
            .header("X-Test", "1")
            .body(b"data".to_vec())
            .build();
        req.set_expect_continue(true);
        req.clear();

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), "");
        assert!(req.headers().is_empty());
        assert!(req.query().is_empty());
        assert!(req.body().is_empty());
        assert!(!req.expect_continue());
    }

    #[test]
    fn test_request_to_wire() {
        let req = HttpRequest::builder()
            .method(Method::Post)
            .uri("/submit")
            .header("Host", "example.com")
            .header("Content-Length", "5")
            .body(b"Hello".to_vec())
            .build();

        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert_eq!(
            wire,
            "POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nHello"
        );
    }

    #[test]
    fn test_response_to_wire() {
        let mut resp = HttpResponse::builder()
            .status(Status::new(404))
            .header("Content-Length", "0")
            .build();
        assert_eq!(
            String::from_utf8(resp.to_wire()).unwrap(),
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"
        );

        resp.set_reason("Gone Fishing");
        assert!(String::from_utf8(resp.to_wire())
            .unwrap()
            .starts_with("HTTP/1.1 404 Gone Fishing\r\n"));
    }

    #[test]
    fn test_unset_status_wire_format() {
        let resp = HttpResponse::new(Status::UNSET);
        assert!(resp.to_wire().starts_with(b"HTTP/1.1 000 Unknown\r\n"));
    }
}
