//! Listening socket, readiness multiplexer and ready-event queue
//!
//! A connection is owned by exactly one party at a time: the poller while
//! it is watched, the [`EventQueue`] while it waits for a worker, and then
//! the worker that popped it. Ownership moves by value, so two threads can
//! never drive the same socket.

pub mod listener;
pub mod poller;
pub mod queue;

pub use listener::Listener;
pub use poller::{Poller, PollerHandle};
pub use queue::EventQueue;

use bytes::BytesMut;
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::ops::{BitOr, BitOrAssign};

/// Result type for network setup
pub type Result<T> = std::result::Result<T, Error>;

/// Network setup errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Readiness bits reported for a connection
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const READ: EventMask = EventMask(1);
    pub const WRITE: EventMask = EventMask(1 << 1);
    pub const OOB: EventMask = EventMask(1 << 2);
    pub const ACCEPT: EventMask = EventMask(1 << 3);
    pub const ERROR: EventMask = EventMask(1 << 4);
    pub const CLOSE: EventMask = EventMask(1 << 5);
    pub const TIMEOUT: EventMask = EventMask(1 << 6);
    pub const BUSY: EventMask = EventMask(1 << 7);

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Translate `poll(2)` revents
    pub fn from_revents(revents: libc::c_short) -> EventMask {
        let mut mask = EventMask::NONE;
        if revents & libc::POLLPRI != 0 {
            mask |= EventMask::OOB;
        }
        if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            mask |= EventMask::ERROR;
        }
        if revents & libc::POLLHUP != 0 && revents & libc::POLLIN == 0 {
            mask |= EventMask::CLOSE;
        }
        if revents & libc::POLLIN != 0 {
            mask |= EventMask::READ;
        }
        if revents & libc::POLLOUT != 0 {
            mask |= EventMask::WRITE;
        }
        mask
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventMask, &str); 8] = [
            (EventMask::READ, "READ"),
            (EventMask::WRITE, "WRITE"),
            (EventMask::OOB, "OOB"),
            (EventMask::ACCEPT, "ACCEPT"),
            (EventMask::ERROR, "ERROR"),
            (EventMask::CLOSE, "CLOSE"),
            (EventMask::TIMEOUT, "TIMEOUT"),
            (EventMask::BUSY, "BUSY"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// An accepted client socket
///
/// `pending` holds request bytes already read past the previous message
/// on this connection (pipelining); the next cycle parses them first.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub pending: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Connection {
            stream,
            peer,
            pending: BytesMut::new(),
        }
    }
}

/// A connection handed to a worker with the readiness that woke it
#[derive(Debug)]
pub struct Event {
    pub conn: Connection,
    pub mask: EventMask,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_bits() {
        let mask = EventMask::READ | EventMask::OOB;
        assert!(mask.contains(EventMask::READ));
        assert!(mask.contains(EventMask::OOB));
        assert!(!mask.contains(EventMask::ERROR));
        assert!(!mask.contains(EventMask::NONE));
        assert!(mask.intersects(EventMask::OOB | EventMask::CLOSE));
        assert_eq!(format!("{:?}", mask), "READ|OOB");
        assert_eq!(format!("{:?}", EventMask::NONE), "NONE");
    }

    #[test]
    fn test_from_revents() {
        assert_eq!(EventMask::from_revents(libc::POLLIN), EventMask::READ);
        assert_eq!(EventMask::from_revents(libc::POLLHUP), EventMask::CLOSE);
        assert_eq!(
            EventMask::from_revents(libc::POLLIN | libc::POLLHUP),
            EventMask::READ
        );
        assert_eq!(
            EventMask::from_revents(libc::POLLIN | libc::POLLPRI),
            EventMask::READ | EventMask::OOB
        );
        assert!(EventMask::from_revents(libc::POLLNVAL).contains(EventMask::ERROR));
    }
}
