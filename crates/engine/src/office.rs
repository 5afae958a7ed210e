//! The office: a named scheduling domain.
//!
//! An office owns the resolved meta-data for its works, tasks, managed
//! objects, administrators, and escalation handlers, plus the startup flows
//! run when the floor opens. Processes are created here; the management API
//! reaches running functions through [`FunctionManager`] and ad-hoc objects
//! through [`Office::managed_object`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::anyhow;
use indexmap::IndexMap;
use loft_types::{Scope, event::ProcessEvent};
use loft_util::{Sequence, block_on_future};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    container::{Sourcing, SourcingTimeout},
    error::InvokeError,
    escalation::{EscalationHandler, EscalationProcedure},
    execute::context::TaskContext,
    execute::job::Job,
    execute::process::ProcessState,
    execute::thread::ThreadState,
    floor::Timer,
    meta::{
        admin::AdministratorMetaData,
        object::{ManagedObjectMetaData, ObjectRef},
        task::{TaskMetaData, TaskRef, WorkMetaData},
    },
    plugin::{CompletionCallback, ManagedObject, ProcessListener, Team},
};

/// A named registry of resolved meta-data, ready to create processes.
pub struct Office {
    pub(crate) name: String,
    pub(crate) works: Vec<Arc<WorkMetaData>>,
    pub(crate) tasks: Vec<Arc<TaskMetaData>>,
    pub(crate) functions: IndexMap<String, TaskRef>,
    pub(crate) objects_by_name: IndexMap<String, ObjectRef>,
    pub(crate) process_objects: Arc<Vec<Arc<ManagedObjectMetaData>>>,
    pub(crate) thread_objects: Arc<Vec<Arc<ManagedObjectMetaData>>>,
    pub(crate) work_objects: Arc<Vec<Arc<ManagedObjectMetaData>>>,
    pub(crate) administrators: Vec<Arc<AdministratorMetaData>>,
    pub(crate) teams: Vec<Arc<dyn Team>>,
    pub(crate) team_names: Vec<String>,
    pub(crate) escalations: EscalationProcedure,
    pub(crate) floor_default: Option<EscalationHandler>,
    pub(crate) startup: Vec<(TaskRef, Value)>,
    pub(crate) listeners: Arc<Vec<Arc<dyn ProcessListener>>>,
    pub(crate) timer: Timer,
    pub(crate) ids: Sequence,
    pub(crate) open: AtomicBool,
}

impl Office {
    /// The office's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the functions this office exposes, in declaration order.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Names of the teams this office's tasks are assigned to, in order of
    /// first use.
    pub fn team_names(&self) -> impl Iterator<Item = &str> {
        self.team_names.iter().map(String::as_str)
    }

    /// Manager for the named function (`work.task`).
    pub fn function_manager(self: &Arc<Self>, name: &str) -> Result<FunctionManager, InvokeError> {
        let target = self
            .functions
            .get(name)
            .copied()
            .ok_or_else(|| InvokeError::unknown_function(name))?;
        Ok(FunctionManager {
            office: self.clone(),
            name: name.to_string(),
            target,
        })
    }

    /// Create an activatable process for `target`, executing nothing yet.
    pub(crate) fn create_process(self: &Arc<Self>, target: TaskRef, parameter: Value, callback: Option<CompletionCallback>) -> ProcessHandle {
        let process = ProcessState::new(self.clone(), callback);
        let thread = ThreadState::new(process.clone());
        let flow = thread.open_flow(false);
        let initial = Job::new(flow, target, parameter, None);
        ProcessHandle {
            process,
            initial,
            activated: AtomicBool::new(false),
        }
    }

    /// Source the named object ad hoc, blocking the caller until resolution.
    ///
    /// Intended for bootstrap and diagnostic use against process-independent
    /// objects: instances are sourced directly (never drawn from a pool) and
    /// ownership passes to the caller.
    pub fn managed_object(&self, name: &str) -> Result<ManagedObject, InvokeError> {
        if !self.is_open() {
            return Err(InvokeError::NotOpen);
        }
        let object_ref = self
            .objects_by_name
            .get(name)
            .copied()
            .ok_or_else(|| InvokeError::unknown_object(name))?;
        self.source_adhoc(&self.object_meta(object_ref).clone())
            .map_err(|error| InvokeError::sourcing(name, error.to_string()))
    }

    fn source_adhoc(&self, meta: &Arc<ManagedObjectMetaData>) -> anyhow::Result<ManagedObject> {
        let mut dependencies = Vec::with_capacity(meta.dependencies.len());
        for dependency in &meta.dependencies {
            dependencies.push(self.source_adhoc(&self.object_meta(*dependency).clone())?);
        }

        let source = meta.source.clone();
        let timeout = meta.timeout;
        let name = meta.name.clone();
        block_on_future(async move {
            let (sender, receiver) = oneshot::channel();
            source.source(Sourcing::detached(sender, dependencies));
            match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(resolution)) => resolution,
                Ok(Err(_)) => Err(anyhow!("source dropped the sourcing handle without resolving '{name}'")),
                Err(_) => Err(anyhow::Error::new(SourcingTimeout { object: name, timeout })),
            }
        })
    }

    /// Run the office's startup flows. Called by the floor while opening.
    pub(crate) fn run_startup(self: &Arc<Self>) -> Result<(), InvokeError> {
        for (target, parameter) in &self.startup {
            debug!(office = %self.name, task = %self.task(*target).name, "running startup flow");
            self.create_process(*target, parameter.clone(), None).activate()?;
        }
        Ok(())
    }

    /// Execute a recycle task inline with the instance being released.
    /// Failures are logged and never block the release.
    pub(crate) fn run_recycle(&self, task: TaskRef, object: &ManagedObject, process_id: u64) {
        let meta = self.task(task);
        let mut context = TaskContext::for_recycle(process_id, object.clone());
        if let Err(error) = meta.logic.execute(&mut context) {
            warn!(task = %meta.name, %error, "recycle task failed; instance released anyway");
        }
    }

    pub(crate) fn object_meta(&self, object_ref: ObjectRef) -> &Arc<ManagedObjectMetaData> {
        match object_ref.scope {
            Scope::Process => &self.process_objects[object_ref.index],
            Scope::Thread => &self.thread_objects[object_ref.index],
            Scope::Work => &self.work_objects[object_ref.index],
        }
    }

    pub(crate) fn all_object_metas(&self) -> impl Iterator<Item = &Arc<ManagedObjectMetaData>> {
        self.process_objects
            .iter()
            .chain(self.thread_objects.iter())
            .chain(self.work_objects.iter())
    }

    pub(crate) fn task(&self, task_ref: TaskRef) -> &Arc<TaskMetaData> {
        &self.tasks[task_ref.0]
    }

    pub(crate) fn work(&self, index: usize) -> &Arc<WorkMetaData> {
        &self.works[index]
    }

    pub(crate) fn administrator(&self, index: usize) -> &Arc<AdministratorMetaData> {
        &self.administrators[index]
    }

    pub(crate) fn team(&self, index: usize) -> &Arc<dyn Team> {
        &self.teams[index]
    }

    pub(crate) fn escalations(&self) -> &EscalationProcedure {
        &self.escalations
    }

    pub(crate) fn floor_default(&self) -> Option<&EscalationHandler> {
        self.floor_default.as_ref()
    }

    pub(crate) fn process_object_metas(&self) -> Arc<Vec<Arc<ManagedObjectMetaData>>> {
        self.process_objects.clone()
    }

    pub(crate) fn thread_object_metas(&self) -> Arc<Vec<Arc<ManagedObjectMetaData>>> {
        self.thread_objects.clone()
    }

    pub(crate) fn work_object_metas(&self) -> Arc<Vec<Arc<ManagedObjectMetaData>>> {
        self.work_objects.clone()
    }

    pub(crate) fn listeners(&self) -> Arc<Vec<Arc<dyn ProcessListener>>> {
        self.listeners.clone()
    }

    pub(crate) fn timer(&self) -> &Timer {
        &self.timer
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.ids.next()
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Management handle for one function of an office.
pub struct FunctionManager {
    office: Arc<Office>,
    name: String,
    target: TaskRef,
}

impl FunctionManager {
    /// The qualified function name this manager invokes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create and activate a process running this function.
    ///
    /// The caller observes only synchronous errors here; everything that
    /// happens after activation, including escalation outcomes, arrives
    /// through the completion callback.
    pub fn invoke_process(&self, parameter: Value, callback: Option<CompletionCallback>) -> Result<ProcessHandle, InvokeError> {
        if !self.office.is_open() {
            return Err(InvokeError::NotOpen);
        }
        let handle = self.office.create_process(self.target, parameter, callback);
        handle.activate()?;
        Ok(handle)
    }
}

/// Activatable handle to a created process.
pub struct ProcessHandle {
    process: Arc<ProcessState>,
    initial: Job,
    activated: AtomicBool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("process_id", &self.process.id())
            .field("activated", &self.activated.load(Ordering::SeqCst))
            .finish()
    }
}

impl ProcessHandle {
    /// Identifier of the underlying process.
    pub fn process_id(&self) -> u64 {
        self.process.id()
    }

    /// Assign the initial job to its team. Idempotent; a refusal tears the
    /// process down and surfaces as an assignment error.
    pub fn activate(&self) -> Result<(), InvokeError> {
        if self.activated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.initial.activate().map_err(|refusal| {
            self.process.terminate_failed(refusal.to_string());
            self.initial.abandon();
            InvokeError::from(refusal)
        })
    }

    /// Cancel the process: in-flight steps finish, nothing further is
    /// instigated, and containers release through the pool's lost path.
    pub fn cancel(&self) {
        self.process.cancel();
    }

    /// Snapshot of the process journal so far.
    pub fn journal(&self) -> Vec<ProcessEvent> {
        self.process.journal_snapshot()
    }
}
