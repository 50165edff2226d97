//! HTTP/1.x message model and wire contract
//!
//! This module holds everything the connection engine needs to turn bytes
//! into requests and responses and back again.
//!
//! # Architecture
//!
//! The transport is reached only through the session operations
//! abstraction:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` adds the poll-count timeout on top of a `SessionOps`
//! - `HttpContext` owns the current request/response pair, the scratch
//!   buffers and the chunk decoder, and drives parsing and packing
//!   through a session
//!
//! # Examples
//!
//! ```no_run
//! use svcd::http::{HttpClient, HttpRequest, Method};
//! use svcd::http::session::FdSessionOps;
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//! let mut client = HttpClient::new(FdSessionOps::new(stream));
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("/")
//!     .header("Host", "localhost")
//!     .build();
//! client.send_request(&request).unwrap();
//!
//! let response = client.receive_response().unwrap();
//! assert_eq!(response.status().code(), 200);
//! ```

pub mod chunked;
pub mod client;
pub mod context;
pub mod headers;
pub mod message;
pub mod parser;
pub mod session;
pub mod status;

pub use chunked::{ChunkDecoder, ChunkState, ChunkedEncoder};
pub use client::HttpClient;
pub use context::{Direction, HttpContext, Limits};
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Version};
pub use session::{HttpSession, SessionOps};
pub use status::{status_reason_phrase, status_valid, Status};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Request URL exceeds {0} bytes")]
    UrlTooLong(usize),

    #[error("Request header exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("Message body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Error taxonomy shared by the message model, the route registry and the
/// static file fallback.
///
/// The connection state machine is the only place that turns a kind into
/// an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or oversized request data (4xx)
    ClientData,
    /// Allocation or I/O failure (5xx or connection abort)
    Internal,
    NotFound,
    Unsupported,
    ServiceError,
    NoSuchLibrary,
    NoAccess,
    Existed,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Timeout | Error::ConnectionClosed => ErrorKind::Internal,
            _ => ErrorKind::ClientData,
        }
    }

    /// True when the transport itself failed and the connection must be
    /// dropped without a response
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout | Error::ConnectionClosed)
    }

    /// Status code reported to the client for a client data error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UrlTooLong(_) => 414,
            Error::HeaderTooLarge(_) => 431,
            Error::BodyTooLarge(_) => 413,
            Error::InvalidVersion(_) => 505,
            Error::Io(_) | Error::Timeout | Error::ConnectionClosed => 500,
            _ => 400,
        }
    }
}

/// Maximum number of header lines per message
pub const MAX_HEADERS: usize = 128;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
