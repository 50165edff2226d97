//! Listening socket
//!
//! The socket is bound with `SO_REUSEADDR` (and `SO_REUSEPORT` where the
//! platform has it) before any worker process is forked, so all processes
//! accept from the same port.

use super::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

/// Non-blocking TCP listener
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<Self> {
        let socket = Self::socket(addr).map_err(|source| Error::Bind { addr, source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| Error::Bind { addr, source })?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;

        Ok(Listener {
            inner: socket.into(),
        })
    }

    fn socket(addr: SocketAddr) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        Ok(socket)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one pending connection, if any
    ///
    /// The returned stream is blocking with `TCP_NODELAY` set; workers
    /// poll it for readiness before every read and write.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                Ok(Some((stream, peer)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
