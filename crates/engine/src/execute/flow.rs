//! Live flow state.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{container::ContainerTable, execute::job::Job, execute::thread::ThreadState};

/// One instigation of linked tasks within a thread.
///
/// A flow executes at most one job at a time; sequential continuations queue
/// behind it. The flow completes when its queue drains, or is abandoned when
/// a job fails, and releases its work-scoped containers either way.
pub(crate) struct FlowState {
    thread: Arc<ThreadState>,
    containers: ContainerTable,
    queue: Mutex<VecDeque<Job>>,
    clears_failure: bool,
    completed: AtomicBool,
}

impl FlowState {
    pub(crate) fn new(thread: Arc<ThreadState>, clears_failure: bool) -> Arc<Self> {
        let process = thread.process();
        let office = process.office();
        let containers = ContainerTable::new(office.work_object_metas(), Arc::downgrade(process), office.timer().clone());
        Arc::new(Self {
            thread,
            containers,
            queue: Mutex::new(VecDeque::new()),
            clears_failure,
            completed: AtomicBool::new(false),
        })
    }

    pub(crate) fn thread(&self) -> &Arc<ThreadState> {
        &self.thread
    }

    pub(crate) fn containers(&self) -> &ContainerTable {
        &self.containers
    }

    /// True when this flow is handling an escalation; its completion clears
    /// the thread's failure slot, and failures inside it skip the work- and
    /// office-level handlers.
    pub(crate) fn clears_failure(&self) -> bool {
        self.clears_failure
    }

    /// Queue a job to run after the currently executing one.
    pub(crate) fn push_sequential(&self, job: Job) {
        self.queue.lock().expect("flow queue lock").push_back(job);
    }

    /// Activate the next queued job, or complete the flow when none remain.
    pub(crate) fn advance(self: &Arc<Self>) {
        let next = self.queue.lock().expect("flow queue lock").pop_front();
        match next {
            Some(job) => job.activate_or_escalate(),
            None => self.complete(),
        }
    }

    /// Drop any queued continuations and complete. Used when a job in this
    /// flow failed; the failure already escalated.
    pub(crate) fn abandon(self: &Arc<Self>) {
        self.queue.lock().expect("flow queue lock").clear();
        self.complete();
    }

    fn complete(self: &Arc<Self>) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        let process = self.thread.process().clone();
        let office = process.office().clone();
        let process_id = process.id();
        let lost = process.unload_lost();
        self.containers
            .unload(lost, &|task, object| office.run_recycle(task, object, process_id));
        if self.clears_failure {
            self.thread.clear_failure();
        }
        self.thread.flow_completed();
    }
}
