//! Session operations abstraction
//!
//! `SessionOps` is the only coupling between the HTTP layer and the
//! transport. Parsing and packing never touch a socket directly; they go
//! through an [`HttpSession`], which adds the poll-count timeout.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// Abstracts the readiness-poll-then-recv/send primitives of a transport.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Receive one byte of urgent (out-of-band) data, if any is pending
    fn recv_oob(&mut self) -> Result<Option<u8>> {
        Ok(None)
    }

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// HTTP session wrapping a transport
///
/// Every read and write first waits for readiness. The timeout is a count
/// of failed readiness polls of `poll_interval` each, not a wall-clock
/// deadline; once `timeout` polls in a row fail the operation returns
/// [`Error::Timeout`].
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: u32,
    poll_interval: Duration,
}

impl<S: SessionOps> HttpSession<S> {
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: 50,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Set the number of failed polls tolerated per operation
    pub fn set_timeout(&mut self, polls: u32) {
        self.timeout = polls.max(1);
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    fn wait(&self, events: PollEvents) -> Result<()> {
        for _ in 0..self.timeout {
            if self.session.poll(events, Some(self.poll_interval))? {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Read data with timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.wait(PollEvents::Read)?;
        self.session.read(buf)
    }

    /// Write data with timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.wait(PollEvents::Write)?;
        self.session.write(buf)
    }

    /// Write the whole buffer in pieces of at most `chunk` bytes
    pub fn write_all(&mut self, mut buf: &[u8], chunk: usize) -> Result<()> {
        let chunk = chunk.max(1);
        while !buf.is_empty() {
            let end = buf.len().min(chunk);
            let n = self.write(&buf[..end])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Try to drain one urgent byte, polling at most `attempts` times
    pub fn recv_oob(&mut self, attempts: u32) -> Result<Option<u8>> {
        for _ in 0..attempts {
            if let Some(byte) = self.session.recv_oob()? {
                return Ok(Some(byte));
            }
            std::thread::sleep(self.poll_interval / 10);
        }
        Ok(None)
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    pub fn get_ref(&self) -> &S {
        &self.session
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_inner(self) -> S {
        self.session
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        // SAFETY: `pfd` is a valid pollfd that outlives the call.
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn recv_oob(&mut self) -> Result<Option<u8>> {
        let mut byte = 0u8;
        // SAFETY: the buffer is a single valid byte owned by this frame.
        let n = unsafe {
            libc::recv(
                self.stream.as_raw_fd(),
                &mut byte as *mut u8 as *mut libc::c_void,
                1,
                libc::MSG_OOB | libc::MSG_DONTWAIT,
            )
        };

        if n == 1 {
            return Ok(Some(byte));
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            // EINVAL: no urgent data pending; EAGAIN: mark not reached yet
            if matches!(err.raw_os_error(), Some(libc::EINVAL))
                || err.kind() == io::ErrorKind::WouldBlock
            {
                return Ok(None);
            }
            return Err(Error::Io(err));
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(Error::Io(err)),
            _ => Ok(()),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}
