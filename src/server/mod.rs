//! Server assembly
//!
//! [`ServerContext`] is built once per process and shared by reference
//! with every worker. [`Server::bind`] creates the listening socket;
//! [`Server::start`] spawns the poller thread and the worker pool.
//!
//! ```no_run
//! use svcd::config::ServerConfig;
//! use svcd::route::ServiceLibraries;
//! use svcd::server::Server;
//!
//! let config = ServerConfig::from_file("svcd.toml").unwrap();
//! let server = Server::bind(config, ServiceLibraries::new()).unwrap();
//! let running = server.start().unwrap();
//! println!("listening on {}", running.local_addr());
//! running.wait();
//! ```

pub mod connection;
pub mod static_files;
pub mod worker;

pub use connection::{classify, State, Task};
pub use static_files::{mime_type, DocRoot, StaticError, DEFAULT_MIME_TYPE};
pub use worker::WorkerPool;

use crate::config::{ConfigError, ServerConfig};
use crate::http::Limits;
use crate::net::{self, Event, EventQueue, Listener, Poller, PollerHandle};
use crate::route::{self, RouteRegistry, ServiceLibraries};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Server startup errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Route(#[from] route::Error),

    #[error(transparent)]
    Net(#[from] net::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Process-wide state shared by all workers
pub struct ServerContext {
    config: ServerConfig,
    limits: Limits,
    registry: RouteRegistry,
    doc_root: DocRoot,
}

impl ServerContext {
    /// Validate `config` and build the route registry from it
    pub fn new(config: ServerConfig, mut services: ServiceLibraries) -> Result<Self, ServerError> {
        config.validate()?;
        if config.plugins {
            services.enable_plugins(true);
        }
        let registry = RouteRegistry::from_config(&config.routes, services)?;
        Ok(ServerContext {
            limits: config.http_limits(),
            doc_root: DocRoot::new(config.doc_root.clone()),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Route table; administrative add/update/erase go through here
    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn doc_root(&self) -> &DocRoot {
        &self.doc_root
    }
}

/// A bound, not yet running server
pub struct Server {
    context: Arc<ServerContext>,
    listener: Listener,
}

impl Server {
    pub fn bind(config: ServerConfig, services: ServiceLibraries) -> Result<Self, ServerError> {
        let listener = Listener::bind(config.listen, config.backlog)?;
        let context = ServerContext::new(config, services)?;
        Ok(Server {
            context: Arc::new(context),
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Spawn the poller and the worker pool
    pub fn start(self) -> Result<RunningServer, ServerError> {
        let addr = self.listener.local_addr()?;
        let queue = Arc::new(EventQueue::new());
        let (poller, handle) = Poller::new(
            self.listener,
            Arc::clone(&queue),
            self.context.config().keepalive_idle(),
        )?;

        let poller_thread = thread::Builder::new()
            .name("svcd-poller".to_string())
            .spawn(move || {
                if let Err(e) = poller.run() {
                    error!("poller failed: {}", e);
                }
            })?;

        let pool = match WorkerPool::spawn(
            self.context.config().worker_task_n,
            &self.context,
            &queue,
            &handle,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                handle.shutdown();
                let _ = poller_thread.join();
                return Err(e.into());
            }
        };

        info!(addr = %addr, pid = std::process::id(), "server started");
        Ok(RunningServer {
            context: self.context,
            addr,
            queue,
            handle,
            poller: Some(poller_thread),
            pool: Some(pool),
        })
    }

    /// Start and block until the server stops
    pub fn run(self) -> Result<(), ServerError> {
        self.start()?.wait();
        Ok(())
    }
}

/// A started server; dropping it shuts it down
pub struct RunningServer {
    context: Arc<ServerContext>,
    addr: SocketAddr,
    queue: Arc<EventQueue<Event>>,
    handle: PollerHandle,
    poller: Option<JoinHandle<()>>,
    pool: Option<WorkerPool>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn poller(&self) -> &PollerHandle {
        &self.handle
    }

    /// Stop accepting, let in-flight requests finish and join all threads
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Block until the poller exits, then stop the workers
    pub fn wait(mut self) {
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            self.handle.shutdown();
            let _ = poller.join();
        }
        self.queue.close();
        if let Some(pool) = self.pool.take() {
            pool.join();
            info!(addr = %self.addr, "server stopped");
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Where this process ended up after [`fork_workers`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRole {
    /// The original process, with the pids of its children
    Parent(Vec<libc::pid_t>),
    /// Forked child number `n` (1-based)
    Child(usize),
}

/// Fork `extra` copies of this process
///
/// Must run after the listener is bound and before any thread is
/// spawned; each process then starts its own poller and workers.
pub fn fork_workers(extra: usize) -> io::Result<ProcessRole> {
    let mut children = Vec::with_capacity(extra);
    for n in 1..=extra {
        // SAFETY: called while the process is single-threaded.
        match unsafe { libc::fork() } {
            -1 => return Err(io::Error::last_os_error()),
            0 => return Ok(ProcessRole::Child(n)),
            pid => children.push(pid),
        }
    }
    Ok(ProcessRole::Parent(children))
}

/// Reap forked children, returning how many exited unsuccessfully
pub fn wait_children(children: &[libc::pid_t]) -> usize {
    let mut failed = 0;
    for &pid in children {
        let mut status = 0;
        // SAFETY: `status` is a valid out-pointer.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc < 0 || !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
            failed += 1;
        }
    }
    failed
}
