//! Readiness multiplexer
//!
//! One poller thread per process watches the listener, a wake-up socket
//! and every idle keep-alive connection. A connection that becomes ready
//! is removed from the watched set and moved into the [`EventQueue`];
//! workers give it back through [`PollerHandle::rearm`] once a keep-alive
//! cycle completes.

use super::{Connection, Event, EventMask, EventQueue, Listener};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on one `poll(2)` wait, so idle expiry and shutdown are
/// noticed promptly
const POLL_SLICE: Duration = Duration::from_millis(250);
const MIN_POLL: Duration = Duration::from_millis(10);

struct Watched {
    conn: Connection,
    since: Instant,
}

struct Shared {
    inbox: Mutex<Vec<Connection>>,
    wake: UnixStream,
    shutdown: AtomicBool,
}

impl Shared {
    fn wake(&self) {
        match (&self.wake).write(&[1]) {
            Ok(_) => {}
            // a full pipe already guarantees a wake-up
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("poller wake-up failed: {}", e),
        }
    }
}

/// Worker-side access to a running [`Poller`]
#[derive(Clone)]
pub struct PollerHandle {
    shared: Arc<Shared>,
}

impl PollerHandle {
    /// Hand a keep-alive connection back for read events
    ///
    /// A poller that is shutting down refuses and returns the connection.
    pub fn rearm(&self, conn: Connection) -> Result<(), Connection> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(conn);
        }
        self.shared.inbox.lock().push(conn);
        self.shared.wake();
        Ok(())
    }

    /// Ask the poller thread to exit
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake();
    }
}

/// The multiplexer loop
pub struct Poller {
    listener: Listener,
    queue: Arc<EventQueue<Event>>,
    wake_rx: UnixStream,
    shared: Arc<Shared>,
    watched: Vec<Watched>,
    idle: Duration,
}

impl Poller {
    pub fn new(
        listener: Listener,
        queue: Arc<EventQueue<Event>>,
        idle: Duration,
    ) -> io::Result<(Poller, PollerHandle)> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_tx.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;

        let shared = Arc::new(Shared {
            inbox: Mutex::new(Vec::new()),
            wake: wake_tx,
            shutdown: AtomicBool::new(false),
        });
        let handle = PollerHandle {
            shared: Arc::clone(&shared),
        };

        let poller = Poller {
            listener,
            queue,
            wake_rx,
            shared,
            watched: Vec::new(),
            idle,
        };
        Ok((poller, handle))
    }

    /// Run until shutdown is requested or the queue is closed
    pub fn run(mut self) -> io::Result<()> {
        let mut fds: Vec<libc::pollfd> = Vec::new();

        while !self.shared.shutdown.load(Ordering::Acquire) {
            fds.clear();
            fds.push(pollfd(self.listener.as_raw_fd(), libc::POLLIN));
            fds.push(pollfd(self.wake_rx.as_raw_fd(), libc::POLLIN));
            for w in &self.watched {
                fds.push(pollfd(w.conn.stream.as_raw_fd(), libc::POLLIN | libc::POLLPRI));
            }

            let timeout = POLL_SLICE.min(self.idle).max(MIN_POLL).as_millis() as libc::c_int;
            // SAFETY: `fds` is a valid, initialized slice of pollfd.
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if !self.dispatch_ready(&fds[2..]) {
                break;
            }
            if fds[1].revents != 0 {
                self.drain_wake();
            }
            if !self.take_rearmed() {
                break;
            }
            if fds[0].revents & libc::POLLIN != 0 {
                self.accept_all();
            }
        }

        debug!(watched = self.watched.len(), "poller stopped");
        Ok(())
    }

    /// Move ready connections to the queue and expire idle ones
    ///
    /// `revents[i]` belongs to `self.watched[i]`. Walking backwards keeps
    /// that pairing valid across `swap_remove`.
    fn dispatch_ready(&mut self, revents: &[libc::pollfd]) -> bool {
        for i in (0..self.watched.len()).rev() {
            let mask = EventMask::from_revents(revents[i].revents);
            if !mask.is_empty() {
                let w = self.watched.swap_remove(i);
                if !self.enqueue(w.conn, mask) {
                    return false;
                }
            } else if self.watched[i].since.elapsed() >= self.idle {
                let w = self.watched.swap_remove(i);
                debug!(peer = %w.conn.peer, "idle keep-alive connection dropped");
            }
        }
        true
    }

    fn drain_wake(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.wake_rx.read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("poller wake-up drain failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Watch re-armed connections; ones with buffered input go straight
    /// to the queue
    fn take_rearmed(&mut self) -> bool {
        let rearmed = std::mem::take(&mut *self.shared.inbox.lock());
        for conn in rearmed {
            if !conn.pending.is_empty() {
                if !self.enqueue(conn, EventMask::READ) {
                    return false;
                }
            } else {
                self.watch(conn);
            }
        }
        true
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some((stream, peer))) => {
                    debug!(peer = %peer, "accepted");
                    self.watch(Connection::new(stream, peer));
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn watch(&mut self, conn: Connection) {
        self.watched.push(Watched {
            conn,
            since: Instant::now(),
        });
    }

    fn enqueue(&mut self, conn: Connection, mask: EventMask) -> bool {
        match self.queue.push(Event { conn, mask }) {
            Ok(()) => true,
            Err(_) => {
                debug!("event queue closed");
                false
            }
        }
    }
}

fn pollfd(fd: std::os::fd::RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}
