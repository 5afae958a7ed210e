//! Live process state.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use loft_types::{ProcessOutcome, event::ProcessEvent, event::ProcessEventKind};
use serde_json::Value;
use tracing::debug;

use crate::{
    container::ContainerTable,
    execute::job::Job,
    execute::thread::ThreadState,
    meta::task::TaskRef,
    observe::Journal,
    office::Office,
    plugin::CompletionCallback,
};

/// One end-to-end invocation.
///
/// Owns the process-scoped containers and the journal; terminal when every
/// thread it opened is terminal. Termination always releases the process
/// containers, through the pool's lost path when the process was cancelled
/// or failed.
pub(crate) struct ProcessState {
    id: u64,
    office: Arc<Office>,
    containers: ContainerTable,
    journal: Journal,
    active_threads: Mutex<usize>,
    cancelled: AtomicBool,
    failed: Mutex<Option<String>>,
    completion: Mutex<Option<CompletionCallback>>,
    finalized: AtomicBool,
}

impl ProcessState {
    pub(crate) fn new(office: Arc<Office>, completion: Option<CompletionCallback>) -> Arc<Self> {
        let id = office.next_id();
        Arc::new_cyclic(|process| Self {
            id,
            containers: ContainerTable::new(office.process_object_metas(), process.clone(), office.timer().clone()),
            journal: Journal::new(id, office.listeners()),
            office,
            active_threads: Mutex::new(0),
            cancelled: AtomicBool::new(false),
            failed: Mutex::new(None),
            completion: Mutex::new(completion),
            finalized: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn office(&self) -> &Arc<Office> {
        &self.office
    }

    pub(crate) fn containers(&self) -> &ContainerTable {
        &self.containers
    }

    pub(crate) fn record(&self, kind: ProcessEventKind) {
        self.journal.record(kind);
    }

    pub(crate) fn journal_snapshot(&self) -> Vec<ProcessEvent> {
        self.journal.snapshot()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True when containers must release through the pool's lost path.
    pub(crate) fn unload_lost(&self) -> bool {
        self.is_cancelled() || self.failed.lock().expect("process failure lock").is_some()
    }

    /// Cancel on loss of the external trigger: in-flight steps finish, no
    /// further flow is instigated, containers release through the lost path.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(process = self.id, "process cancelled");
        }
    }

    /// The built-in terminal escalation handler: mark the process failed and
    /// stop instigating. The first terminal failure wins.
    pub(crate) fn terminate_failed(&self, message: String) {
        {
            let mut failed = self.failed.lock().expect("process failure lock");
            if failed.is_none() {
                debug!(process = self.id, %message, "process terminally failed");
                *failed = Some(message);
            }
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn thread_opened(&self) {
        let mut active = self.active_threads.lock().expect("process thread count lock");
        *active += 1;
    }

    pub(crate) fn thread_completed(self: &Arc<Self>) {
        let terminal = {
            let mut active = self.active_threads.lock().expect("process thread count lock");
            *active = active.saturating_sub(1);
            *active == 0
        };
        if terminal {
            self.finalize();
        }
    }

    /// Open a new thread under this process for a parallel flow.
    pub(crate) fn spawn_thread(self: &Arc<Self>, target: TaskRef, parameter: Value) {
        if self.is_cancelled() {
            return;
        }
        let thread = ThreadState::new(self.clone());
        let flow = thread.open_flow(false);
        Job::new(flow, target, parameter, None).activate_or_escalate();
    }

    fn finalize(self: &Arc<Self>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let lost = self.unload_lost();
        let office = self.office.clone();
        let process_id = self.id;
        self.containers
            .unload(lost, &|task, object| office.run_recycle(task, object, process_id));

        let outcome = {
            let failed = self.failed.lock().expect("process failure lock");
            match failed.as_ref() {
                Some(message) => ProcessOutcome::Failed {
                    message: message.clone(),
                },
                None if self.is_cancelled() => ProcessOutcome::Cancelled,
                None => ProcessOutcome::Completed,
            }
        };

        self.record(ProcessEventKind::ProcessCompleted {
            success: outcome.is_completed(),
        });
        debug!(process = self.id, ?outcome, "process complete");

        let callback = self.completion.lock().expect("process completion lock").take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}
