//! Worker thread pool

use super::connection::Task;
use super::ServerContext;
use crate::net::{Event, EventQueue, PollerHandle};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Fixed set of threads running the connection state machine against one
/// shared queue
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        n: usize,
        server: &Arc<ServerContext>,
        queue: &Arc<EventQueue<Event>>,
        poller: &PollerHandle,
    ) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(n);
        for id in 0..n {
            let mut task = Task::new(Arc::clone(server), Arc::clone(queue), poller.clone());
            let worker = thread::Builder::new()
                .name(format!("svcd-worker-{}", id))
                .spawn(move || task.run());
            match worker {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // unblock the threads already started
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }
        info!(workers = n, "worker pool started");
        Ok(WorkerPool { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker; the queue must be closed first
    pub fn join(self) {
        for handle in self.workers {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                error!(worker = ?name, "worker panicked");
            }
        }
    }
}
