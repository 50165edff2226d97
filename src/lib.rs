//! svcd - HTTP/1.x service router
//!
//! A standalone HTTP/1.x server that routes requests to registered service
//! handlers and falls back to static files.
//!
//! - [`http`]: message model, chunked coding and the session abstraction
//! - [`route`]: the route registry and service handlers
//! - [`net`]: listener, readiness poller and ready-event queue
//! - [`server`]: the connection state machine and worker pool

pub mod config;
pub mod http;
pub mod logging;
pub mod net;
pub mod route;
pub mod server;
