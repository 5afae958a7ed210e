//! Execution contexts handed to task and duty logic.
//!
//! Context is always an explicit value, never ambient state: the parameter,
//! the objects, the outbound flows, and the escalation being handled all
//! travel through the context passed to the logic.

use anyhow::{Result, anyhow, bail};
use serde_json::Value;

use crate::{escalation::Escalation, execute::job::Job, plugin::ManagedObject};

enum Mode {
    /// Ordinary scheduled execution.
    Task { job: Job },
    /// Inline execution of a recycle task at scope end.
    Recycle { process_id: u64, object: ManagedObject },
}

/// Context for one task-body execution.
pub struct TaskContext {
    mode: Mode,
    parameter: Value,
    instigations: Vec<(usize, Value)>,
}

impl TaskContext {
    pub(crate) fn for_job(job: Job) -> Self {
        let parameter = job.parameter().clone();
        Self {
            mode: Mode::Task { job },
            parameter,
            instigations: Vec::new(),
        }
    }

    pub(crate) fn for_recycle(process_id: u64, object: ManagedObject) -> Self {
        Self {
            mode: Mode::Recycle { process_id, object },
            parameter: Value::Null,
            instigations: Vec::new(),
        }
    }

    /// The parameter this invocation was instigated with.
    pub fn parameter(&self) -> &Value {
        &self.parameter
    }

    /// The declared managed object at `index`, in declaration order.
    pub fn object(&self, index: usize) -> Result<ManagedObject> {
        let Mode::Task { job } = &self.mode else {
            bail!("managed objects are not available to a recycle task");
        };
        let object_ref = job
            .task()
            .objects
            .get(index)
            .copied()
            .ok_or_else(|| anyhow!("task '{}' declares no object {index}", job.task().name))?;
        job.locate_container(object_ref)
            .object()
            .ok_or_else(|| anyhow!("object {index} of task '{}' is not ready", job.task().name))
    }

    /// Queue the declared flow at `index` for instigation once the body
    /// returns. Sequential flows run in instigation order, before the task's
    /// next-task link.
    pub fn instigate(&mut self, index: usize, parameter: Value) -> Result<()> {
        let Mode::Task { job } = &self.mode else {
            bail!("a recycle task cannot instigate flows");
        };
        if index >= job.task().flows.len() {
            bail!("task '{}' declares no flow {index}", job.task().name);
        }
        self.instigations.push((index, parameter));
        Ok(())
    }

    /// The escalation being handled, when this task is an escalation flow.
    pub fn escalation(&self) -> Option<&Escalation> {
        match &self.mode {
            Mode::Task { job } => job.escalation(),
            Mode::Recycle { .. } => None,
        }
    }

    /// The instance being released, when this task is a recycle flow.
    pub fn recycle_object(&self) -> Option<&ManagedObject> {
        match &self.mode {
            Mode::Recycle { object, .. } => Some(object),
            Mode::Task { .. } => None,
        }
    }

    /// Identifier of the owning process.
    pub fn process_id(&self) -> u64 {
        match &self.mode {
            Mode::Task { job } => job.process_id(),
            Mode::Recycle { process_id, .. } => *process_id,
        }
    }

    pub(crate) fn take_instigations(&mut self) -> Vec<(usize, Value)> {
        std::mem::take(&mut self.instigations)
    }
}

/// Context for one duty execution.
pub struct DutyContext {
    job: Job,
    flow_count: usize,
    instigations: Vec<(usize, Value)>,
}

impl DutyContext {
    pub(crate) fn new(job: Job, flow_count: usize) -> Self {
        Self {
            job,
            flow_count,
            instigations: Vec::new(),
        }
    }

    /// Queue the duty's declared flow at `index` for instigation once the
    /// duty returns successfully.
    pub fn instigate(&mut self, index: usize, parameter: Value) -> Result<()> {
        if index >= self.flow_count {
            bail!("duty declares no flow {index}");
        }
        self.instigations.push((index, parameter));
        Ok(())
    }

    /// Identifier of the owning process.
    pub fn process_id(&self) -> u64 {
        self.job.process_id()
    }

    pub(crate) fn take_instigations(&mut self) -> Vec<(usize, Value)> {
        std::mem::take(&mut self.instigations)
    }
}
