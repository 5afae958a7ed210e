//! Plugin seams of the engine.
//!
//! Everything the engine does not do itself crosses one of the traits in this
//! module: how a managed object is acquired (`ManagedObjectSource`), how
//! pooled instances circulate (`ManagedObjectPool`), how jobs are executed
//! (`Team`), what a task or duty actually does (`TaskLogic`, `Duty`), and who
//! gets told about process events (`ProcessListener`). Implementations are
//! registered at build time; the engine only ever talks to them through these
//! contracts.

use std::{any::Any, sync::Arc, sync::Weak};

use anyhow::Result;
use indexmap::IndexMap;
use loft_types::ProcessOutcome;
use loft_types::event::ProcessEvent;
use serde_json::Value;

use crate::{
    container::Sourcing,
    error::{AssignError, InvokeError},
    execute::context::{DutyContext, TaskContext},
    execute::job::Job,
    office::{Office, ProcessHandle},
};

/// A sourced managed-object instance.
///
/// Instances are exposed to tasks only through their container; anything
/// needing mutation brings its own interior mutability, the usual shape for
/// pooled connections and caches.
pub type ManagedObject = Arc<dyn Any + Send + Sync>;

/// An extension handle a duty operates over, extracted from a managed object.
pub type Extension = Arc<dyn Any + Send + Sync>;

/// Callback invoked exactly once when a process reaches a terminal state.
pub type CompletionCallback = Box<dyn FnOnce(ProcessOutcome) + Send>;

/// Supplies managed-object instances on demand.
///
/// `source` is the asynchronous acquisition entry point: the engine hands the
/// implementation a [`Sourcing`] handle and the implementation resolves it
/// exactly once, from any thread, now or later. Waiting tasks never occupy a
/// worker while the resolution is pending.
pub trait ManagedObjectSource: Send + Sync {
    /// Called once at build time with the configured properties.
    fn init(&self, _properties: &IndexMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Called when the owning office floor opens. The context allows the
    /// source to act as an external trigger and invoke processes of its own;
    /// sources that trigger later keep a clone of it.
    fn start(&self, _context: &SourceContext) -> Result<()> {
        Ok(())
    }

    /// Acquire one instance. Resolve `sourcing` with `set_object` or
    /// `set_failure`, exactly once per call.
    fn source(&self, sourcing: Sourcing);
}

/// Circulates pooled managed-object instances.
///
/// Pools are the only cross-scope shared structure in the engine and must
/// serialise acquire/return internally.
pub trait ManagedObjectPool: Send + Sync {
    /// Hand out an instance, constructing one if the pool is empty.
    fn source_new_object(&self) -> Result<ManagedObject>;

    /// Accept an instance back after its owning scope ended normally.
    fn return_object(&self, object: ManagedObject);

    /// Accept notice that an instance will not be returned: the owning
    /// process was cancelled, failed, or the instance itself faulted.
    fn lost_object(&self, object: ManagedObject, cause: Option<&anyhow::Error>);
}

/// A named worker pool executing assigned jobs.
///
/// `assign` must hand the job off without blocking; a saturated team refuses
/// with [`AssignError::Overloaded`] rather than queueing beyond policy.
/// `stop_working` refuses further assignment but never discards jobs already
/// mid-execution.
pub trait Team: Send + Sync {
    /// Begin accepting assignments. Bracketed by the floor open lifecycle.
    fn start_working(&self) -> Result<()>;

    /// Hand a ready-to-run job to the pool. Returns immediately.
    fn assign(&self, job: Job) -> Result<(), AssignError>;

    /// Refuse new assignments and let in-flight work drain.
    fn stop_working(&self);
}

/// The body of a task.
///
/// The returned value becomes the parameter of the task's next-task link.
/// Closures with the matching signature implement this trait directly.
pub trait TaskLogic: Send + Sync {
    fn execute(&self, context: &mut TaskContext) -> Result<Value>;
}

impl<F> TaskLogic for F
where
    F: Fn(&mut TaskContext) -> Result<Value> + Send + Sync,
{
    fn execute(&self, context: &mut TaskContext) -> Result<Value> {
        self(context)
    }
}

/// Cross-cutting logic run before or after a task body.
///
/// A duty receives the extension handles extracted from the managed objects
/// it administers; failures escalate exactly like task failures.
pub trait Duty: Send + Sync {
    fn execute(&self, extensions: &[Extension], context: &mut DutyContext) -> Result<()>;
}

impl<F> Duty for F
where
    F: Fn(&[Extension], &mut DutyContext) -> Result<()> + Send + Sync,
{
    fn execute(&self, extensions: &[Extension], context: &mut DutyContext) -> Result<()> {
        self(extensions, context)
    }
}

/// Receives process journal events as they are recorded.
pub trait ProcessListener: Send + Sync {
    fn on_event(&self, event: &ProcessEvent);
}

/// Execution context handed to a source when the floor opens.
///
/// Sources that represent external triggers (listeners, pollers) use this to
/// start processes in their owning office.
#[derive(Clone)]
pub struct SourceContext {
    office: Weak<Office>,
}

impl SourceContext {
    pub(crate) fn new(office: Weak<Office>) -> Self {
        Self { office }
    }

    /// Invoke a function of the owning office as a new process.
    pub fn invoke_process(
        &self,
        function: &str,
        parameter: Value,
        callback: Option<CompletionCallback>,
    ) -> Result<ProcessHandle, InvokeError> {
        let office = self.office.upgrade().ok_or(InvokeError::NotOpen)?;
        office.function_manager(function)?.invoke_process(parameter, callback)
    }
}
