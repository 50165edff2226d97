//! Per-connection protocol state machine
//!
//! Each worker thread owns one [`Task`]: an [`HttpContext`] slot plus the
//! connection currently being served. A task pops a ready connection,
//! drives it through one request/response cycle and then either hands it
//! back to the poller (keep-alive) or closes it.

use super::{ServerContext, StaticError};
use crate::http::session::FdSessionOps;
use crate::http::{status_valid, Error, HttpContext, HttpSession, Method, Status};
use crate::logging::ACCESS_TARGET;
use crate::net::{Connection, Event, EventMask, EventQueue, PollerHandle};
use crate::route::Invoke;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Attempts made to drain one urgent byte
const OOB_ATTEMPTS: u32 = 3;

/// Methods listed in `Allow` on a 405
const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT, PATCH, DELETE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    GetWait,
    IsOob,
    HttpParse,
    HttpShake,
    ExecService,
    HttpGet,
    HttpHead,
    Http2xx,
    Http3xx,
    Http4xx,
    Http5xx,
    HttpPack,
    ConnKeepalive,
    ConnClose,
}

/// Header finalization path for a handler-set status
///
/// Unset and unknown codes take the 2xx path, as do valid codes outside
/// the four buckets.
pub fn classify(code: u16) -> State {
    if code == 0 || !status_valid(code) {
        return State::Http2xx;
    }
    match code {
        200..=206 => State::Http2xx,
        300..=307 => State::Http3xx,
        400..=449 => State::Http4xx,
        500..=511 => State::Http5xx,
        _ => State::Http2xx,
    }
}

/// One worker's connection slot
pub struct Task {
    server: Arc<ServerContext>,
    queue: Arc<EventQueue<Event>>,
    poller: PollerHandle,
    ctx: HttpContext,
    session: Option<HttpSession<FdSessionOps>>,
    peer: Option<SocketAddr>,
    mask: EventMask,
    keep_alive: bool,
    responded: bool,
}

impl Task {
    pub fn new(
        server: Arc<ServerContext>,
        queue: Arc<EventQueue<Event>>,
        poller: PollerHandle,
    ) -> Self {
        let ctx = HttpContext::new(server.limits().clone());
        Task {
            server,
            queue,
            poller,
            ctx,
            session: None,
            peer: None,
            mask: EventMask::NONE,
            keep_alive: false,
            responded: false,
        }
    }

    /// Serve connections until the queue is closed
    pub fn run(&mut self) {
        while self.run_cycle() {}
        debug!("worker stopped");
    }

    /// Run one connection from GET_WAIT back to GET_WAIT
    ///
    /// Returns false once the queue is closed.
    pub fn run_cycle(&mut self) -> bool {
        let mut state = match self.get_wait() {
            Some(state) => state,
            None => return false,
        };
        while state != State::GetWait {
            state = self.step(state);
        }
        true
    }

    fn step(&mut self, state: State) -> State {
        let next = match state {
            State::GetWait => State::GetWait,
            State::IsOob => self.is_oob(),
            State::HttpParse => self.http_parse(),
            State::HttpShake => self.http_shake(),
            State::ExecService => self.exec_service(),
            State::HttpGet => self.http_static(false),
            State::HttpHead => self.http_static(true),
            State::Http2xx | State::Http3xx => self.finalize_success(),
            State::Http4xx | State::Http5xx => self.finalize_error(),
            State::HttpPack => self.http_pack(),
            State::ConnKeepalive => self.conn_keepalive(),
            State::ConnClose => self.conn_close(),
        };
        debug!(from = ?state, to = ?next, "transition");
        next
    }

    fn get_wait(&mut self) -> Option<State> {
        self.ctx.reset();
        self.session = None;
        self.peer = None;
        self.keep_alive = false;
        self.responded = false;

        let Event { conn, mask } = self.queue.pop()?;
        let Connection {
            stream,
            peer,
            pending,
        } = conn;

        let mut session = HttpSession::new(FdSessionOps::new(stream));
        session.set_timeout(self.server.config().timeout);
        session.set_poll_interval(self.server.config().poll_interval());
        self.session = Some(session);
        self.peer = Some(peer);
        self.mask = mask;
        self.ctx.set_peer(peer);
        self.ctx.set_pending(&pending);

        let next = if mask.intersects(EventMask::ERROR) {
            State::ConnClose
        } else if mask.contains(EventMask::OOB) {
            State::IsOob
        } else if mask.contains(EventMask::READ) {
            State::HttpParse
        } else {
            State::ConnClose
        };
        Some(next)
    }

    fn is_oob(&mut self) -> State {
        let Some(session) = self.session.as_mut() else {
            return State::ConnClose;
        };
        match session.recv_oob(OOB_ATTEMPTS) {
            Ok(Some(byte)) => {
                debug!(peer = ?self.peer, byte, "urgent data drained");
                State::HttpParse
            }
            Ok(None) => State::ConnClose,
            Err(e) => {
                debug!(peer = ?self.peer, "urgent data read failed: {}", e);
                State::ConnClose
            }
        }
    }

    fn http_parse(&mut self) -> State {
        let Some(session) = self.session.as_mut() else {
            return State::ConnClose;
        };
        match self.ctx.parse_request(session) {
            Ok(()) => {
                let request = self.ctx.request();
                self.keep_alive = request.keep_alive();
                // chunked coding overrides any Content-Length
                let has_body = request.expects_body();
                if self.ctx.request_wants_shake() && has_body {
                    State::HttpShake
                } else {
                    State::ExecService
                }
            }
            Err(e) => self.client_failure(e),
        }
    }

    fn http_shake(&mut self) -> State {
        let Some(session) = self.session.as_mut() else {
            return State::ConnClose;
        };
        if let Err(e) = self.ctx.pack_continue(session) {
            debug!(peer = ?self.peer, "100 Continue not sent: {}", e);
            return State::ConnClose;
        }
        match self.ctx.read_body(session) {
            Ok(()) => State::ExecService,
            Err(e) => self.client_failure(e),
        }
    }

    /// Transport failures close silently; bad request data gets an error
    /// response and then a close
    fn client_failure(&mut self, err: Error) -> State {
        if err.is_transport() {
            debug!(peer = ?self.peer, "connection dropped: {}", err);
            return State::ConnClose;
        }
        debug!(peer = ?self.peer, "bad request: {}", err);
        self.keep_alive = false;
        let code = err.status_code();
        self.ctx.response_mut().set_status(code);
        if code >= 500 {
            State::Http5xx
        } else {
            State::Http4xx
        }
    }

    fn exec_service(&mut self) -> State {
        self.ctx.response_mut().set_status(Status::OK);

        let method = self.ctx.request().method();
        if !method.is_dispatchable() {
            self.ctx.response_mut().set_status(Status::METHOD_NOT_ALLOWED);
            return State::Http4xx;
        }

        let path = self.ctx.request().path().to_string();
        let server = Arc::clone(&self.server);
        match server.registry().invoke(&path, &mut self.ctx) {
            Invoke::Ok => {
                let code = self.ctx.response().status().code();
                if code == 0 || !status_valid(code) {
                    self.ctx.response_mut().set_status(Status::OK);
                }
                classify(code)
            }
            Invoke::NotFound => match method {
                Method::Get => State::HttpGet,
                Method::Head => State::HttpHead,
                _ => self.fail(Status::NOT_FOUND),
            },
            Invoke::Unsupported => self.fail(Status::NOT_IMPLEMENTED),
            Invoke::ServiceError(code) => {
                warn!(path = %path, code, "service returned an error");
                self.fail(Status::INTERNAL_SERVER_ERROR)
            }
            Invoke::NoSuchLibrary => {
                warn!(path = %path, "service library could not be loaded");
                self.fail(Status::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Discard any partial handler output and report `status`
    fn fail(&mut self, status: Status) -> State {
        let response = self.ctx.response_mut();
        response.body_mut().clear();
        response.set_status(status);
        if status.is_server_error() {
            State::Http5xx
        } else {
            State::Http4xx
        }
    }

    fn http_static(&mut self, head: bool) -> State {
        let path = self.ctx.request().path().to_string();
        let server = Arc::clone(&self.server);
        let response = self.ctx.response_mut();
        match server.doc_root().serve(&path, response.body_mut()) {
            Ok(mime) => {
                if !response.headers().contains("Content-Type") {
                    response.headers_mut().set("Content-Type", mime);
                }
                debug!(path = %path, head, bytes = response.body().len(), "static file");
                State::Http2xx
            }
            Err(StaticError::NotFound) => self.fail(Status::NOT_FOUND),
            Err(StaticError::NoAccess) => self.fail(Status::FORBIDDEN),
            Err(StaticError::Io(e)) => {
                warn!(path = %path, "static file read failed: {}", e);
                self.fail(Status::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn finalize_success(&mut self) -> State {
        self.set_base_headers();
        State::HttpPack
    }

    fn finalize_error(&mut self) -> State {
        let response = self.ctx.response_mut();
        if response.body().is_empty() {
            let status = response.status();
            let page = error_page(status);
            response.set_body(page);
            response.headers_mut().set("Content-Type", "text/html");
        }
        self.set_base_headers();
        State::HttpPack
    }

    fn set_base_headers(&mut self) {
        let version = self.ctx.request().version();
        let keep_alive = self.keep_alive;
        let server_name = self.server.config().server_name.clone();

        let response = self.ctx.response_mut();
        response.set_version(version);
        let allow = response.status() == Status::METHOD_NOT_ALLOWED;
        let len = response.body().len();

        let headers = response.headers_mut();
        headers.set("Server", server_name);
        headers.set("Date", httpdate::fmt_http_date(SystemTime::now()));
        headers.set("Connection", if keep_alive { "keep-alive" } else { "close" });
        if !headers.contains("Content-Type") {
            headers.set("Content-Type", super::DEFAULT_MIME_TYPE);
        }
        if allow {
            headers.set("Allow", ALLOWED_METHODS);
        }
        headers.remove("Transfer-Encoding");
        headers.set("Content-Length", len.to_string());
    }

    fn http_pack(&mut self) -> State {
        let Some(session) = self.session.as_mut() else {
            return State::ConnClose;
        };
        let head_only = self.ctx.request().method() == Method::Head;
        if let Err(e) = self.ctx.pack_response(session, head_only) {
            debug!(peer = ?self.peer, "response not sent: {}", e);
            self.keep_alive = false;
            return State::ConnClose;
        }
        self.responded = true;
        if self.keep_alive {
            State::ConnKeepalive
        } else {
            State::ConnClose
        }
    }

    fn conn_keepalive(&mut self) -> State {
        self.access_log();
        let (Some(session), Some(peer)) = (self.session.take(), self.peer) else {
            return State::ConnClose;
        };
        let conn = Connection {
            stream: session.into_inner().into_stream(),
            peer,
            pending: self.ctx.take_pending(),
        };
        match self.poller.rearm(conn) {
            Ok(()) => State::GetWait,
            Err(conn) => {
                debug!(peer = %peer, "re-arm refused, closing");
                self.responded = false;
                self.session = Some(HttpSession::new(FdSessionOps::new(conn.stream)));
                State::ConnClose
            }
        }
    }

    fn conn_close(&mut self) -> State {
        if self.responded {
            self.access_log();
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!(peer = ?self.peer, "close failed: {}", e);
            }
        }
        State::GetWait
    }

    fn access_log(&self) {
        let request = self.ctx.request();
        let response = self.ctx.response();
        info!(
            target: ACCESS_TARGET,
            peer = %self.peer.map(|p| p.to_string()).unwrap_or_default(),
            method = %request.method(),
            url = %request.uri(),
            version = %request.version(),
            status = response.status().code(),
            bytes = response.body().len(),
            "request"
        );
    }
}

/// Minimal HTML body echoing the status line
pub fn error_page(status: Status) -> String {
    let line = format!("{:03} {}", status.code(), status.reason_phrase());
    format!(
        "<html><head><title>{line}</title></head><body><h1>{line}</h1></body></html>\r\n",
        line = line
    )
}
