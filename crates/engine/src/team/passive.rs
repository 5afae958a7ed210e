//! Team executing jobs on the assigning thread.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;

use crate::{error::AssignError, execute::job::Job, plugin::Team};

/// The degenerate worker pool: whoever assigns, executes.
///
/// Useful for startup flows, tests, and work that must not hop threads. A
/// passive team never refuses for capacity, only when stopped.
pub struct PassiveTeam {
    name: String,
    working: AtomicBool,
}

impl PassiveTeam {
    /// Create a stopped passive team.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            working: AtomicBool::new(false),
        })
    }

    /// The team's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Team for PassiveTeam {
    fn start_working(&self) -> Result<()> {
        self.working.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn assign(&self, job: Job) -> Result<(), AssignError> {
        if !self.working.load(Ordering::SeqCst) {
            return Err(AssignError::stopped(&self.name));
        }
        job.run();
        Ok(())
    }

    fn stop_working(&self) {
        self.working.store(false, Ordering::SeqCst);
    }
}
