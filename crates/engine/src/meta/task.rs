//! Work and task meta-data.

use std::sync::Arc;

use crate::{
    escalation::EscalationProcedure,
    meta::{flow::FlowMetaData, object::ObjectRef},
    plugin::TaskLogic,
};

/// Resolved reference to a task: an index into the office task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef(pub usize);

/// Resolved reference to a duty: administrator index and duty index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyRef {
    /// Index into the office administrator table.
    pub administrator: usize,
    /// Index into that administrator's duty list.
    pub duty: usize,
}

/// Immutable description of one executable task.
pub struct TaskMetaData {
    /// Qualified name, `work.task`.
    pub name: String,
    /// Index of the owning work in the office work table.
    pub work: usize,
    /// Index of the assigned team in the office team table.
    pub team: usize,
    /// The task body.
    pub logic: Arc<dyn TaskLogic>,
    /// Declared objects in the order the logic addresses them.
    pub objects: Vec<ObjectRef>,
    /// Declared objects that need an async-readiness check before execution.
    pub async_checks: Vec<ObjectRef>,
    /// Every container this task needs ready before it runs: declared and
    /// duty-administered objects plus their transitive dependencies, in
    /// leaf-first order. Computed once at build.
    pub load_order: Vec<ObjectRef>,
    /// Duties run after the objects are ready and before the body.
    pub pre_duties: Vec<DutyRef>,
    /// Duties run after the body returns normally.
    pub post_duties: Vec<DutyRef>,
    /// Task run next in the same flow, fed the body's return value.
    pub next: Option<TaskRef>,
    /// Outbound flow links the logic may instigate by index.
    pub flows: Vec<FlowMetaData>,
}

/// Immutable description of one work: a named group of tasks with its own
/// failure handlers.
pub struct WorkMetaData {
    /// Work name, unique within the office.
    pub name: String,
    /// Task a process invoking this work starts at.
    pub initial: TaskRef,
    /// Every task belonging to the work.
    pub tasks: Vec<TaskRef>,
    /// Work-level escalation handlers, consulted before the office's.
    pub escalations: EscalationProcedure,
}
