//! Live thread state.

use std::sync::{Arc, Mutex};

use loft_types::event::ProcessEventKind;
use tracing::{debug, warn};

use crate::{
    container::ContainerTable,
    escalation::{CompoundFailure, Escalation},
    execute::flow::FlowState,
    execute::job::Job,
    execute::process::ProcessState,
    meta::task::TaskRef,
};

/// One logical thread of control inside a process.
///
/// Owns the thread-scoped containers and the failure slot. The thread is
/// terminal when every flow it opened has completed; completion releases its
/// containers and notifies the process.
pub(crate) struct ThreadState {
    id: u64,
    process: Arc<ProcessState>,
    containers: ContainerTable,
    failure: Mutex<Option<Escalation>>,
    active_flows: Mutex<usize>,
}

impl ThreadState {
    pub(crate) fn new(process: Arc<ProcessState>) -> Arc<Self> {
        let office = process.office();
        let id = office.next_id();
        let containers = ContainerTable::new(office.thread_object_metas(), Arc::downgrade(&process), office.timer().clone());
        process.thread_opened();
        Arc::new(Self {
            id,
            process,
            containers,
            failure: Mutex::new(None),
            active_flows: Mutex::new(0),
        })
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub(crate) fn containers(&self) -> &ContainerTable {
        &self.containers
    }

    /// Open a new flow on this thread.
    pub(crate) fn open_flow(self: &Arc<Self>, clears_failure: bool) -> Arc<FlowState> {
        {
            let mut active = self.active_flows.lock().expect("thread flow count lock");
            *active += 1;
        }
        FlowState::new(self.clone(), clears_failure)
    }

    /// Called by a flow when it completes. The last flow out releases the
    /// thread's containers and completes the thread.
    pub(crate) fn flow_completed(&self) {
        let terminal = {
            let mut active = self.active_flows.lock().expect("thread flow count lock");
            *active = active.saturating_sub(1);
            *active == 0
        };
        if !terminal {
            return;
        }
        debug!(thread = self.id, "thread complete");
        let office = self.process.office().clone();
        let process_id = self.process.id();
        let lost = self.process.unload_lost();
        self.containers
            .unload(lost, &|task, object| office.run_recycle(task, object, process_id));
        self.process.thread_completed();
    }

    pub(crate) fn clear_failure(&self) {
        let mut failure = self.failure.lock().expect("thread failure lock");
        *failure = None;
    }

    /// Resolve a raised failure into a handler flow, or terminate the
    /// process through the built-in terminal handler.
    ///
    /// The slot holds at most one in-flight failure: a second failure while
    /// the first is unresolved is wrapped as a compound failure and resolved
    /// through the floor-level chain only, never overwriting the first.
    pub(crate) fn handle_failure(self: &Arc<Self>, escalation: Escalation) {
        self.process.record(ProcessEventKind::EscalationRaised {
            task: escalation.task.clone(),
            message: escalation.cause.to_string(),
        });

        if self.process.is_cancelled() {
            debug!(task = %escalation.task, "failure on a cancelled process; no handler instigated");
            return;
        }

        let office = self.process.office().clone();

        let (resolvable, escalation) = {
            let mut slot = self.failure.lock().expect("thread failure lock");
            if let Some(primary) = slot.as_ref() {
                warn!(
                    task = %escalation.task,
                    primary = %primary.cause,
                    "secondary failure while an earlier failure is unresolved"
                );
                let compound = CompoundFailure {
                    primary: primary.cause.to_string(),
                    secondary: escalation.cause.to_string(),
                };
                (
                    false,
                    Escalation::new(escalation.task.clone(), escalation.origin, anyhow::Error::new(compound), true),
                )
            } else if escalation.from_handler {
                (false, escalation)
            } else {
                *slot = Some(escalation.clone());
                (true, escalation)
            }
        };

        let floor_default = |cause: &anyhow::Error| -> Option<TaskRef> {
            office
                .floor_default()
                .filter(|handler| handler.matches(cause))
                .map(|handler| handler.target)
        };

        let target = if resolvable {
            let task = office.task(escalation.origin);
            let work = office.work(task.work);
            work.escalations
                .resolve(&escalation.cause)
                .or_else(|| office.escalations().resolve(&escalation.cause))
                .or_else(|| floor_default(&escalation.cause))
        } else {
            floor_default(&escalation.cause)
        };

        match target {
            Some(handler) => {
                debug!(task = %escalation.task, handler = ?handler, "escalation resolved to handler flow");
                let flow = self.open_flow(resolvable);
                let parameter = escalation.summary();
                Job::new(flow, handler, parameter, Some(escalation)).activate_or_terminal();
            }
            None => {
                debug!(task = %escalation.task, "escalation reached the terminal handler");
                self.process.terminate_failed(escalation.cause.to_string());
            }
        }
    }
}
