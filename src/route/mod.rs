//! Route registry
//!
//! An ordered, rarely mutated table mapping URL patterns to service
//! handlers. Readers never block each other or writers: the table is an
//! immutable snapshot that writers replace in one atomic store.
//!
//! # Examples
//!
//! ```
//! use svcd::route::{Invoke, RouteKind, RouteRegistry, ServiceLibraries};
//! use svcd::http::HttpContext;
//!
//! let mut services = ServiceLibraries::new();
//! services.register("libecho.so", "echo", |_: &RouteRegistry, ctx: &mut HttpContext| {
//!     ctx.response_mut().set_body("ok");
//!     0
//! });
//!
//! let registry = RouteRegistry::new(services);
//! registry.add("^/svc/", "svc", RouteKind::Native, "libecho.so").unwrap();
//!
//! let mut ctx = HttpContext::default();
//! assert_eq!(registry.invoke("/svc/echo", &mut ctx), Invoke::Ok);
//! assert_eq!(ctx.response().body(), b"ok");
//! ```

pub mod registry;
pub mod service;

pub use registry::{RouteEntry, RouteRegistry};
pub use service::{ServiceFn, ServiceHandler, ServiceLibraries};

use crate::http::ErrorKind;
use std::fmt;

/// Result type for registry administration
pub type Result<T> = std::result::Result<T, Error>;

/// Route administration errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Route {name:?} with pattern {pattern:?} already exists")]
    Existed { name: String, pattern: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Pattern(_) => ErrorKind::ClientData,
            Error::Existed { .. } => ErrorKind::Existed,
        }
    }
}

/// How a route's handler is implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouteKind {
    /// Function resolved from a service library
    #[default]
    Native,
    /// Script-backed handler; recognised but not executed
    UnsupportedScripted,
    Unknown,
}

impl RouteKind {
    /// Parse a configured kind; anything unrecognised is `Unknown`
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => RouteKind::Native,
            "scripted" => RouteKind::UnsupportedScripted,
            _ => RouteKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Native => "native",
            RouteKind::UnsupportedScripted => "scripted",
            RouteKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`RouteRegistry::invoke`]
///
/// Every failure is a value; the connection state machine maps it to a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoke {
    Ok,
    /// No route matched, or the library lacks the requested symbol
    NotFound,
    /// The matched route is not `Native`
    Unsupported,
    /// The handler returned this nonzero code
    ServiceError(i32),
    NoSuchLibrary,
}

impl Invoke {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Invoke::Ok => None,
            Invoke::NotFound => Some(ErrorKind::NotFound),
            Invoke::Unsupported => Some(ErrorKind::Unsupported),
            Invoke::ServiceError(_) => Some(ErrorKind::ServiceError),
            Invoke::NoSuchLibrary => Some(ErrorKind::NoSuchLibrary),
        }
    }
}
