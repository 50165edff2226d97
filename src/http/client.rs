//! HTTP client implementation
//!
//! A thin client over [`HttpContext`] used by the integration tests and
//! for probing a running server.

use super::chunked::encode_chunked_body;
use super::{
    Error, HttpContext, HttpRequest, HttpResponse, HttpSession, Limits, Method, Result,
    SessionOps,
};
use std::time::Duration;

/// HTTP client
///
/// Provides methods for sending requests and receiving responses.
pub struct HttpClient<S: SessionOps> {
    session: HttpSession<S>,
    ctx: HttpContext,
    last_method: Method,
}

impl<S: SessionOps> HttpClient<S> {
    /// Create a new HTTP client with a session
    pub fn new(session: S) -> Self {
        Self::with_limits(session, Limits::default())
    }

    pub fn with_limits(session: S, limits: Limits) -> Self {
        HttpClient {
            session: HttpSession::new(session),
            ctx: HttpContext::new(limits),
            last_method: Method::Get,
        }
    }

    /// Set the number of failed readiness polls tolerated per operation
    pub fn set_timeout(&mut self, polls: u32) {
        self.session.set_timeout(polls);
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.session.set_poll_interval(interval);
    }

    /// Send an HTTP request
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<()> {
        self.last_method = request.method();
        *self.ctx.request_mut() = request.clone();
        self.ctx.pack_request(&mut self.session)
    }

    /// Send a request head followed by `body` in chunks of `chunk_size`
    ///
    /// `Transfer-Encoding: chunked` is added to the head.
    pub fn send_chunked(
        &mut self,
        request: &HttpRequest,
        body: &[u8],
        chunk_size: usize,
    ) -> Result<()> {
        let mut head = request.clone();
        head.headers_mut().set("Transfer-Encoding", "chunked");
        head.headers_mut().remove("Content-Length");

        head.set_body(encode_chunked_body(body, chunk_size)?);

        self.send_request(&head)
    }

    /// Write raw bytes, bypassing the message model
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.write_all(bytes, self.ctx.limits().write_cache_size)
    }

    /// Receive the next final response
    ///
    /// Interim 1xx responses are skipped.
    pub fn receive_response(&mut self) -> Result<HttpResponse> {
        loop {
            let response = self.receive_any()?;
            if !response.status().is_informational() {
                return Ok(response);
            }
        }
    }

    /// Receive one response, interim or final
    pub fn receive_any(&mut self) -> Result<HttpResponse> {
        let head_request = self.last_method == Method::Head;
        self.ctx.parse_response(&mut self.session, head_request)?;
        Ok(self.ctx.response().clone())
    }

    /// Send a simple GET request
    pub fn get(&mut self, uri: &str) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Get)
            .uri(uri)
            .header("Host", "localhost")
            .build();

        self.send_request(&request)?;
        self.receive_response()
    }

    /// Send a simple POST request with body
    pub fn post(&mut self, uri: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri(uri)
            .header("Host", "localhost")
            .header("Content-Length", body.len().to_string())
            .body(body)
            .build();

        self.send_request(&request)?;
        self.receive_response()
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        match self.session.close() {
            Err(Error::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    /// Get a reference to the underlying session
    pub fn session(&self) -> &HttpSession<S> {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn session_mut(&mut self) -> &mut HttpSession<S> {
        &mut self.session
    }
}
