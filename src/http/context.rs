//! Per-slot HTTP connection context
//!
//! One `HttpContext` belongs to one worker task slot. It is reset at the
//! start of every request cycle and reused across connections, so its
//! buffers are allocated once per worker.

use super::parser::{
    find_crlf, find_head_end, leading_empty_lines, parse_head, parse_request_line,
    parse_status_line, REQUEST_LINE_SLACK,
};
use super::session::{HttpSession, SessionOps};
use super::{ChunkDecoder, Error, HttpRequest, HttpResponse, Result, Status};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;

/// Size limits applied while parsing and packing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted request target
    pub max_url_size: usize,
    /// Largest header section (and trailer section)
    pub max_header_size: usize,
    /// Largest decoded message body
    pub max_body_size: usize,
    /// Bytes requested from the transport per read
    pub read_cache_size: usize,
    /// Largest single write handed to the transport
    pub write_cache_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_url_size: 8192,
            max_header_size: 16 * 1024,
            max_body_size: 8 * 1024 * 1024,
            read_cache_size: 8192,
            write_cache_size: 8192,
        }
    }
}

/// Which message a chunked body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Request/response pair plus parse state for one connection cycle
pub struct HttpContext {
    limits: Limits,
    request: HttpRequest,
    response: HttpResponse,
    /// Received bytes not yet consumed by the parser
    rbuf: BytesMut,
    scratch: Vec<u8>,
    wbuf: BytesMut,
    chunk: ChunkDecoder,
    peer: Option<SocketAddr>,
}

impl HttpContext {
    pub fn new(limits: Limits) -> Self {
        HttpContext {
            scratch: vec![0u8; limits.read_cache_size.max(1)],
            rbuf: BytesMut::with_capacity(limits.read_cache_size),
            wbuf: BytesMut::with_capacity(limits.write_cache_size),
            chunk: ChunkDecoder::new(limits.max_body_size, limits.max_header_size),
            request: HttpRequest::default(),
            response: HttpResponse::default(),
            peer: None,
            limits,
        }
    }

    /// Clear every per-connection field
    pub fn reset(&mut self) {
        self.request.clear();
        self.response.clear();
        self.rbuf.clear();
        self.wbuf.clear();
        self.chunk.reset();
        self.peer = None;
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Hand over received bytes that were read past the current message
    pub fn take_pending(&mut self) -> BytesMut {
        self.rbuf.split()
    }

    /// Seed the read buffer with bytes received earlier on this connection
    pub fn set_pending(&mut self, pending: &[u8]) {
        self.rbuf.extend_from_slice(pending);
    }

    /// True when the client sent `Expect: 100-continue`
    pub fn request_wants_shake(&self) -> bool {
        self.request.expect_continue()
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk.is_chunked()
    }

    pub fn is_chunked_finished(&self) -> bool {
        self.chunk.is_finished()
    }

    /// Advance the chunk decoder over `input`
    ///
    /// Data goes to the body of the message picked by `direction`, trailer
    /// fields to its header list. Returns the number of bytes consumed.
    pub fn parse_chunk(&mut self, direction: Direction, input: &[u8]) -> Result<usize> {
        let (body, headers) = match direction {
            Direction::Request => self.request.body_and_headers_mut(),
            Direction::Response => self.response.body_and_headers_mut(),
        };
        self.chunk.decode(input, body, headers)
    }

    fn fill<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<usize> {
        let n = session.read(&mut self.scratch)?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.rbuf.extend_from_slice(&self.scratch[..n]);
        Ok(n)
    }

    /// Read until a complete head is buffered; returns its length
    fn read_head<S: SessionOps>(
        &mut self,
        session: &mut HttpSession<S>,
        is_request: bool,
    ) -> Result<usize> {
        let max_url = self.limits.max_url_size;
        let max_header = self.limits.max_header_size;

        loop {
            let skip = leading_empty_lines(&self.rbuf);
            self.rbuf.advance(skip);

            if let Some(end) = find_head_end(&self.rbuf) {
                return Ok(end);
            }

            match find_crlf(&self.rbuf) {
                None if is_request && self.rbuf.len() > max_url + REQUEST_LINE_SLACK => {
                    return Err(Error::UrlTooLong(max_url));
                }
                None if !is_request && self.rbuf.len() > max_header => {
                    return Err(Error::HeaderTooLarge(max_header));
                }
                Some(line_end) if self.rbuf.len() - line_end > max_header + 4 => {
                    return Err(Error::HeaderTooLarge(max_header));
                }
                _ => {}
            }

            self.fill(session)?;
        }
    }

    /// Decode a chunked body from the read buffer, reading more as needed
    fn read_chunked<S: SessionOps>(
        &mut self,
        session: &mut HttpSession<S>,
        direction: Direction,
    ) -> Result<()> {
        self.chunk.start();
        loop {
            let input = std::mem::take(&mut self.rbuf);
            let consumed = self.parse_chunk(direction, &input);
            self.rbuf = input;
            self.rbuf.advance(consumed?);

            if self.chunk.is_finished() {
                return Ok(());
            }
            self.fill(session)?;
        }
    }

    fn read_sized<S: SessionOps>(
        &mut self,
        session: &mut HttpSession<S>,
        len: usize,
    ) -> Result<BytesMut> {
        if len > self.limits.max_body_size {
            return Err(Error::BodyTooLarge(self.limits.max_body_size));
        }
        while self.rbuf.len() < len {
            self.fill(session)?;
        }
        Ok(self.rbuf.split_to(len))
    }

    /// Parse a request head and, unless the client waits for
    /// `100 Continue`, its body
    pub fn parse_request<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<()> {
        self.request.clear();
        self.chunk.reset();

        let head_len = self.read_head(session, true)?;
        let head = self.rbuf.split_to(head_len);
        let (line, headers) = parse_head(&head, self.limits.max_header_size)?;
        let (method, url, version) = parse_request_line(&line, self.limits.max_url_size)?;

        self.request.set_method(method);
        self.request.set_version(version);
        self.request.set_target(url);
        *self.request.headers_mut() = headers;

        let chunked = self.request.is_chunked();
        if self.request.headers().contains("Transfer-Encoding") && !chunked {
            return Err(Error::InvalidHeader(
                "Unsupported Transfer-Encoding".to_string(),
            ));
        }
        if !chunked {
            // rejects an unparsable Content-Length
            self.request.content_length()?;
        }
        let expect = self.request.headers().has_token("Expect", "100-continue");
        self.request.set_expect_continue(expect);

        if self.request.expect_continue() {
            return Ok(());
        }
        self.read_body(session)
    }

    /// Read the request body announced by the head
    pub fn read_body<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<()> {
        if self.request.is_chunked() {
            return self.read_chunked(session, Direction::Request);
        }
        if let Some(len) = self.request.content_length()? {
            let body = self.read_sized(session, len)?;
            self.request.body_mut().extend_from_slice(&body);
        }
        Ok(())
    }

    /// Parse one response; `head_request` suppresses the body
    ///
    /// Interim (1xx) responses are returned as-is without a body.
    pub fn parse_response<S: SessionOps>(
        &mut self,
        session: &mut HttpSession<S>,
        head_request: bool,
    ) -> Result<()> {
        self.response.clear();
        self.chunk.reset();

        let head_len = self.read_head(session, false)?;
        let head = self.rbuf.split_to(head_len);
        let (line, headers) = parse_head(&head, self.limits.max_header_size)?;
        let (version, status, reason) = parse_status_line(&line)?;

        self.response.set_version(version);
        self.response.set_status(status);
        if let Some(reason) = reason {
            if reason != status.reason_phrase() {
                self.response.set_reason(reason);
            }
        }
        *self.response.headers_mut() = headers;

        let code = status.code();
        if head_request || status.is_informational() || code == 204 || code == 304 {
            return Ok(());
        }
        if self.response.is_chunked() {
            return self.read_chunked(session, Direction::Response);
        }
        if let Some(len) = self.response.content_length()? {
            let body = self.read_sized(session, len)?;
            self.response.body_mut().extend_from_slice(&body);
            return Ok(());
        }

        // no framing: the body runs until the peer closes
        loop {
            if self.rbuf.len() > self.limits.max_body_size {
                return Err(Error::BodyTooLarge(self.limits.max_body_size));
            }
            match self.fill(session) {
                Ok(_) => {}
                Err(Error::ConnectionClosed) => break,
                Err(e) => return Err(e),
            }
        }
        let body = self.rbuf.split();
        self.response.body_mut().extend_from_slice(&body);
        Ok(())
    }

    /// Serialize the current request through `session`
    pub fn pack_request<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<()> {
        self.wbuf.clear();
        self.request.write_head(&mut self.wbuf);
        session.write_all(&self.wbuf, self.limits.write_cache_size)?;
        session.write_all(self.request.body(), self.limits.write_cache_size)
    }

    /// Serialize the current response through `session`
    ///
    /// With `head_only` the body bytes are left out, while the headers
    /// (including `Content-Length`) still describe them.
    pub fn pack_response<S: SessionOps>(
        &mut self,
        session: &mut HttpSession<S>,
        head_only: bool,
    ) -> Result<()> {
        self.wbuf.clear();
        self.response.write_head(&mut self.wbuf);
        session.write_all(&self.wbuf, self.limits.write_cache_size)?;
        if head_only {
            return Ok(());
        }
        session.write_all(self.response.body(), self.limits.write_cache_size)
    }

    /// Send the `100 Continue` interim response
    pub fn pack_continue<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<()> {
        let mut interim = HttpResponse::new(Status::CONTINUE);
        interim.set_version(self.request.version());

        self.wbuf.clear();
        interim.write_head(&mut self.wbuf);
        session.write_all(&self.wbuf, self.limits.write_cache_size)
    }
}

impl Default for HttpContext {
    fn default() -> Self {
        HttpContext::new(Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::PollEvents;
    use crate::http::{Method, Version};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// In-memory transport: each queued slice is returned by one read
    #[derive(Default)]
    struct MemorySession {
        reads: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        /// Report end-of-stream once the reads run out instead of timing out
        eof: bool,
    }

    impl MemorySession {
        fn with_reads(reads: &[&[u8]]) -> HttpSession<MemorySession> {
            let mut session = HttpSession::new(MemorySession {
                reads: reads.iter().map(|r| r.to_vec()).collect(),
                written: Vec::new(),
                eof: false,
            });
            session.set_timeout(1);
            session.set_poll_interval(Duration::from_millis(1));
            session
        }
    }

    impl SessionOps for MemorySession {
        fn poll(&self, events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            Ok(events != PollEvents::Read || self.eof || !self.reads.is_empty())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let Some(mut next) = self.reads.pop_front() else {
                return Ok(0);
            };
            let n = next.len().min(buf.len());
            buf[..n].copy_from_slice(&next[..n]);
            if n < next.len() {
                self.reads.push_front(next.split_off(n));
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn small_limits() -> Limits {
        Limits {
            max_url_size: 32,
            max_header_size: 64,
            max_body_size: 16,
            read_cache_size: 7,
            write_cache_size: 5,
        }
    }

    #[test]
    fn test_parse_request_split_reads() {
        let mut session = MemorySession::with_reads(&[
            b"\r\nPOST /svc/echo?a=1 HT",
            b"TP/1.1\r\nHost: x\r\nContent-",
            b"Length: 5\r\n\r\nhel",
            b"loGET",
        ]);
        let mut ctx = HttpContext::new(Limits {
            read_cache_size: 5,
            ..Limits::default()
        });

        ctx.parse_request(&mut session).unwrap();
        let req = ctx.request();
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), "/svc/echo");
        assert_eq!(req.query_param("a"), Some("1"));
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.headers().get("host"), Some("x"));
        assert_eq!(req.body(), b"hello");
        assert_eq!(&ctx.take_pending()[..], b"GET");
    }

    #[test]
    fn test_parse_request_chunked_with_trailer() {
        let mut session = MemorySession::with_reads(&[
            b"PUT /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi",
            b"ki\r\n0\r\nX-Sum: 9\r\n\r\n",
        ]);
        let mut ctx = HttpContext::default();

        ctx.parse_request(&mut session).unwrap();
        assert!(ctx.is_chunked());
        assert!(ctx.is_chunked_finished());
        assert_eq!(ctx.request().body(), b"Wiki");
        assert_eq!(ctx.request().headers().get("X-Sum"), Some("9"));
    }

    #[test]
    fn test_expect_continue_defers_body() {
        let mut session = MemorySession::with_reads(&[
            b"POST /p HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n",
            b"abcde",
        ]);
        let mut ctx = HttpContext::default();

        ctx.parse_request(&mut session).unwrap();
        assert!(ctx.request_wants_shake());
        assert!(ctx.request().body().is_empty());

        ctx.pack_continue(&mut session).unwrap();
        assert_eq!(session.get_ref().written, b"HTTP/1.1 100 Continue\r\n\r\n");

        ctx.read_body(&mut session).unwrap();
        assert_eq!(ctx.request().body(), b"abcde");
    }

    #[test]
    fn test_short_body_times_out() {
        let mut session = MemorySession::with_reads(&[
            b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nab",
        ]);
        let mut ctx = HttpContext::default();
        assert!(matches!(ctx.parse_request(&mut session), Err(Error::Timeout)));
    }

    #[test]
    fn test_limits() {
        let mut ctx = HttpContext::new(small_limits());

        let long_url = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        let mut session = MemorySession::with_reads(&[long_url.as_bytes()]);
        assert!(matches!(ctx.parse_request(&mut session), Err(Error::UrlTooLong(32))));

        ctx.reset();
        let big_header = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "b".repeat(80));
        let mut session = MemorySession::with_reads(&[big_header.as_bytes()]);
        assert!(matches!(
            ctx.parse_request(&mut session),
            Err(Error::HeaderTooLarge(64))
        ));

        ctx.reset();
        let mut session =
            MemorySession::with_reads(&[b"POST / HTTP/1.1\r\nContent-Length: 17\r\n\r\n"]);
        assert!(matches!(
            ctx.parse_request(&mut session),
            Err(Error::BodyTooLarge(16))
        ));
    }

    #[test]
    fn test_malformed_requests_are_client_errors() {
        let cases: &[&[u8]] = &[
            b"FETCH / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/9.9\r\n\r\n",
            b"GET / HTTP/1.1\r\nNoColon\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
            b"GET / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n",
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
        ];

        for case in cases {
            let mut ctx = HttpContext::default();
            let mut session = MemorySession::with_reads(&[case]);
            let err = ctx.parse_request(&mut session).unwrap_err();
            assert_eq!(
                err.kind(),
                crate::http::ErrorKind::ClientData,
                "{:?} -> {:?}",
                String::from_utf8_lossy(case),
                err
            );
        }
    }

    #[test]
    fn test_pack_response_head_only() {
        let mut session = MemorySession::with_reads(&[]);
        let mut ctx = HttpContext::new(small_limits());
        ctx.response_mut().set_status(200);
        ctx.response_mut().headers_mut().insert("Content-Length", "2");
        ctx.response_mut().set_body("ok");

        ctx.pack_response(&mut session, true).unwrap();
        assert_eq!(
            session.get_ref().written,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n"
        );

        session.get_mut().written.clear();
        ctx.pack_response(&mut session, false).unwrap();
        assert!(session.get_ref().written.ends_with(b"\r\n\r\nok"));
    }

    #[test]
    fn test_parse_response_variants() {
        let mut session = MemorySession::with_reads(&[
            b"HTTP/1.1 100 Continue\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n",
            b"HTTP/1.0 404 Nope\r\n\r\nuntil close",
        ]);
        session.get_mut().eof = true;
        let mut ctx = HttpContext::default();

        ctx.parse_response(&mut session, false).unwrap();
        assert_eq!(ctx.response().status().code(), 100);

        ctx.parse_response(&mut session, false).unwrap();
        assert_eq!(ctx.response().status(), Status::OK);
        assert_eq!(ctx.response().body(), b"ok");

        ctx.parse_response(&mut session, false).unwrap();
        assert_eq!(ctx.response().status().code(), 404);
        assert_eq!(ctx.response().reason(), "Nope");
        assert_eq!(ctx.response().body(), b"until close");
    }
}
