//! The schedulable unit.
//!
//! A job binds one task meta-data to one flow with one parameter. Teams
//! execute jobs; a job that cannot proceed parks itself on the container it
//! is waiting for and is re-assigned to its team by the container's
//! resolution callback, possibly onto a different worker. A job therefore
//! re-enters [`Job::run`] from the top on every activation; readying an
//! already-ready container is a cheap state check.

use std::sync::Arc;

use loft_types::{FlowStrategy, Scope, event::ProcessEventKind};
use serde_json::Value;
use tracing::warn;

use crate::{
    container::{ManagedObjectContainer, Readiness, SourcingFailure},
    error::AssignError,
    escalation::Escalation,
    execute::context::{DutyContext, TaskContext},
    execute::flow::FlowState,
    execute::process::ProcessState,
    execute::thread::ThreadState,
    meta::{flow::FlowMetaData, object::ObjectRef, task::DutyRef, task::TaskMetaData, task::TaskRef},
    office::Office,
    plugin::{Extension, ManagedObject},
};

struct JobInner {
    office: Arc<Office>,
    process: Arc<ProcessState>,
    thread: Arc<ThreadState>,
    flow: Arc<FlowState>,
    task: Arc<TaskMetaData>,
    task_ref: TaskRef,
    parameter: Value,
    escalation: Option<Escalation>,
}

/// A ready-to-schedule invocation of one task.
///
/// Cheaply cloneable; containers hold clones of parked jobs and teams hold
/// clones of assigned ones.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(flow: Arc<FlowState>, task_ref: TaskRef, parameter: Value, escalation: Option<Escalation>) -> Self {
        let thread = flow.thread().clone();
        let process = thread.process().clone();
        let office = process.office().clone();
        let task = office.task(task_ref).clone();
        Self {
            inner: Arc::new(JobInner {
                office,
                process,
                thread,
                flow,
                task,
                task_ref,
                parameter,
                escalation,
            }),
        }
    }

    /// Qualified name of the task this job invokes.
    pub fn task_name(&self) -> &str {
        &self.inner.task.name
    }

    pub(crate) fn task(&self) -> &Arc<TaskMetaData> {
        &self.inner.task
    }

    pub(crate) fn parameter(&self) -> &Value {
        &self.inner.parameter
    }

    pub(crate) fn escalation(&self) -> Option<&Escalation> {
        self.inner.escalation.as_ref()
    }

    pub(crate) fn process_id(&self) -> u64 {
        self.inner.process.id()
    }

    pub(crate) fn locate_container(&self, object_ref: ObjectRef) -> Arc<ManagedObjectContainer> {
        match object_ref.scope {
            Scope::Process => self.inner.process.containers().container(object_ref.index),
            Scope::Thread => self.inner.thread.containers().container(object_ref.index),
            Scope::Work => self.inner.flow.containers().container(object_ref.index),
        }
    }

    /// Hand this job to its task's team.
    pub(crate) fn activate(&self) -> Result<(), AssignError> {
        self.inner.office.team(self.inner.task.team).assign(self.clone())
    }

    /// Hand this job to its team; a refusal escalates on the owning thread.
    pub(crate) fn activate_or_escalate(&self) {
        if let Err(refusal) = self.activate() {
            self.fail(anyhow::Error::new(refusal));
        }
    }

    /// Hand this job to its team; a refusal terminates the process. Used for
    /// escalation-handler flows, where escalating again could loop.
    pub(crate) fn activate_or_terminal(&self) {
        if let Err(refusal) = self.activate() {
            warn!(task = %self.inner.task.name, %refusal, "handler flow refused; terminating process");
            self.inner.process.terminate_failed(refusal.to_string());
            self.inner.flow.abandon();
        }
    }

    /// Abandon this job's flow without escalating. Used when a process is
    /// torn down before its initial job could be assigned.
    pub(crate) fn abandon(&self) {
        self.inner.flow.abandon();
    }

    /// Raise a failure from this job onto its thread.
    pub(crate) fn fail(&self, cause: anyhow::Error) {
        let escalation = Escalation::new(
            self.inner.task.name.clone(),
            self.inner.task_ref,
            cause,
            self.inner.flow.clears_failure(),
        );
        self.inner.thread.handle_failure(escalation);
        self.inner.flow.abandon();
    }

    /// Execute one step of this job on the calling worker.
    ///
    /// Invoked by teams. Returns without executing when a required container
    /// is still resolving; the container re-activates the job when it is.
    pub fn run(&self) {
        let task = &self.inner.task;

        // Ready every container the task needs, dependencies first. The
        // order was computed at build; dependencies of an object always
        // precede it, so injected instances are available when it sources.
        for object_ref in &task.load_order {
            let container = self.locate_container(*object_ref);
            let dependencies = container
                .meta()
                .dependencies
                .iter()
                .map(|dependency| self.locate_container(*dependency).object())
                .collect::<Option<Vec<ManagedObject>>>()
                .unwrap_or_default();
            match container.ensure_ready(self, dependencies) {
                Readiness::Ready => {}
                Readiness::Pending => return,
                Readiness::Failed(cause) => {
                    self.fail(anyhow::Error::new(SourcingFailure {
                        object: container.meta().name.clone(),
                        message: cause.to_string(),
                    }));
                    return;
                }
            }
        }

        for object_ref in &task.async_checks {
            let container = self.locate_container(*object_ref);
            match container.check_async_idle(self) {
                Readiness::Ready => {}
                Readiness::Pending => return,
                Readiness::Failed(cause) => {
                    self.fail(anyhow::Error::new(SourcingFailure {
                        object: container.meta().name.clone(),
                        message: cause.to_string(),
                    }));
                    return;
                }
            }
        }

        self.inner.process.record(ProcessEventKind::TaskInvoked { task: task.name.clone() });

        for duty in &task.pre_duties {
            if let Err(cause) = self.run_duty(*duty) {
                self.fail(cause);
                return;
            }
        }

        let mut context = TaskContext::for_job(self.clone());
        let outcome = task.logic.execute(&mut context);
        let instigations = context.take_instigations();
        let next_parameter = match outcome {
            Ok(value) => value,
            Err(cause) => {
                self.fail(cause);
                return;
            }
        };

        for duty in &task.post_duties {
            if let Err(cause) = self.run_duty(*duty) {
                self.fail(cause);
                return;
            }
        }

        self.complete(instigations, next_parameter);
    }

    fn complete(&self, instigations: Vec<(usize, Value)>, next_parameter: Value) {
        if !self.inner.process.is_cancelled() {
            for (index, parameter) in instigations {
                if let Some(flow_meta) = self.inner.task.flows.get(index).copied() {
                    self.apply_flow(flow_meta, parameter);
                }
            }
            if let Some(next) = self.inner.task.next {
                self.inner
                    .flow
                    .push_sequential(Job::new(self.inner.flow.clone(), next, next_parameter, None));
            }
        }
        self.inner.flow.advance();
    }

    fn apply_flow(&self, meta: FlowMetaData, parameter: Value) {
        match meta.strategy {
            FlowStrategy::Sequential => {
                self.inner
                    .flow
                    .push_sequential(Job::new(self.inner.flow.clone(), meta.target, parameter, None));
            }
            FlowStrategy::Parallel => {
                self.inner.process.spawn_thread(meta.target, parameter);
            }
            FlowStrategy::Asynchronous => {
                let flow = self.inner.thread.open_flow(false);
                Job::new(flow, meta.target, parameter, None).activate_or_escalate();
            }
        }
    }

    fn run_duty(&self, duty_ref: DutyRef) -> anyhow::Result<()> {
        let administrator = self.inner.office.administrator(duty_ref.administrator);
        let duty = &administrator.duties[duty_ref.duty];

        let extensions: Vec<Extension> = duty
            .objects
            .iter()
            .map(|object_ref| {
                let container = self.locate_container(*object_ref);
                let object = container.object().expect("duty object readied before duties run");
                let extract = container.meta().extension.clone().expect("extension validated at build");
                extract(&object)
            })
            .collect();

        let mut context = DutyContext::new(self.clone(), duty.flows.len());
        let result = duty.logic.execute(&extensions, &mut context);
        let instigations = context.take_instigations();
        result?;

        if !self.inner.process.is_cancelled() {
            for (index, parameter) in instigations {
                if let Some(flow_meta) = duty.flows.get(index).copied() {
                    self.apply_flow(flow_meta, parameter);
                }
            }
        }
        Ok(())
    }
}
