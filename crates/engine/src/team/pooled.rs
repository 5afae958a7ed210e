//! Multi-worker team backed by a bounded queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{error::AssignError, execute::job::Job, plugin::Team};

/// How long `stop_working` waits for each worker to finish draining.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    sender: mpsc::Sender<Job>,
    runtime: tokio::runtime::Runtime,
    exits: std::sync::mpsc::Receiver<()>,
}

/// A named team owning its worker pool.
///
/// `start_working` builds a dedicated runtime with the configured number of
/// workers; assignments go through a bounded queue whose capacity is the
/// team's back-pressure policy. A full queue refuses the assignment
/// immediately. `stop_working` closes the queue, drains what was already
/// accepted, and shuts the workers down.
pub struct PooledTeam {
    name: String,
    workers: usize,
    capacity: usize,
    inner: Mutex<Option<Running>>,
}

impl PooledTeam {
    /// Create a stopped team with `workers` workers and a queue bound of
    /// `capacity` assignments.
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            workers: workers.max(1),
            capacity: capacity.max(1),
            inner: Mutex::new(None),
        })
    }

    /// The team's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

async fn worker_loop(receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>, exits: std::sync::mpsc::Sender<()>) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        match job {
            Some(job) => job.run(),
            None => break,
        }
    }
    let _ = exits.send(());
}

impl Team for PooledTeam {
    fn start_working(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("team lock");
        if inner.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .thread_name(format!("{}-worker", self.name))
            .enable_all()
            .build()
            .with_context(|| format!("failed to start workers for team '{}'", self.name))?;

        let (sender, receiver) = mpsc::channel(self.capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (exit_sender, exits) = std::sync::mpsc::channel();
        for _ in 0..self.workers {
            runtime.spawn(worker_loop(receiver.clone(), exit_sender.clone()));
        }

        debug!(team = %self.name, workers = self.workers, capacity = self.capacity, "team working");
        *inner = Some(Running { sender, runtime, exits });
        Ok(())
    }

    fn assign(&self, job: Job) -> Result<(), AssignError> {
        let inner = self.inner.lock().expect("team lock");
        let Some(running) = inner.as_ref() else {
            return Err(AssignError::stopped(&self.name));
        };
        running.sender.try_send(job).map_err(|refusal| match refusal {
            mpsc::error::TrySendError::Full(_) => AssignError::overloaded(&self.name),
            mpsc::error::TrySendError::Closed(_) => AssignError::stopped(&self.name),
        })
    }

    fn stop_working(&self) {
        let running = {
            let mut inner = self.inner.lock().expect("team lock");
            inner.take()
        };
        let Some(running) = running else { return };

        // Closing the queue lets workers drain accepted jobs and exit.
        drop(running.sender);
        for _ in 0..self.workers {
            if running.exits.recv_timeout(DRAIN_TIMEOUT).is_err() {
                warn!(team = %self.name, "worker did not drain within {DRAIN_TIMEOUT:?}");
                break;
            }
        }
        running.runtime.shutdown_background();
        debug!(team = %self.name, "team stopped");
    }
}
