//! Builder surface for declaring an office floor.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use loft_types::{FlowStrategy, Scope};
use serde_json::Value;

use crate::{
    build::validate,
    error::BuildError,
    escalation::FailureMatcher,
    floor::OfficeFloor,
    meta::object::ExtensionExtractor,
    plugin::{Duty, Extension, ManagedObject, ManagedObjectPool, ManagedObjectSource, ProcessListener, TaskLogic, Team},
};

/// Default bound on sourcing and asynchronous operations.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Declares a complete office floor: every team and office.
pub struct OfficeFloorBuilder {
    pub(crate) teams: Vec<(String, Arc<dyn Team>)>,
    pub(crate) offices: Vec<OfficeBuilder>,
    pub(crate) default_escalation: Option<(String, String)>,
}

impl OfficeFloorBuilder {
    /// Start an empty floor declaration.
    pub fn new() -> Self {
        Self {
            teams: Vec::new(),
            offices: Vec::new(),
            default_escalation: None,
        }
    }

    /// Register a team under `name`. Tasks reference teams by this name.
    pub fn add_team(mut self, name: impl Into<String>, team: Arc<dyn Team>) -> Self {
        self.teams.push((name.into(), team));
        self
    }

    /// Add an office to the floor.
    pub fn add_office(mut self, office: OfficeBuilder) -> Self {
        self.offices.push(office);
        self
    }

    /// Declare the floor-level default escalation handler: the qualified
    /// task in the named office that catches failures no office-level
    /// handler matched.
    pub fn default_escalation(mut self, office: impl Into<String>, task: impl Into<String>) -> Self {
        self.default_escalation = Some((office.into(), task.into()));
        self
    }

    /// Resolve and validate the declaration into a runnable floor.
    pub fn build(self) -> Result<OfficeFloor, BuildError> {
        validate::build(self)
    }
}

impl Default for OfficeFloorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares one office.
pub struct OfficeBuilder {
    pub(crate) name: String,
    pub(crate) objects: Vec<ObjectBuilder>,
    pub(crate) works: Vec<WorkBuilder>,
    pub(crate) administrators: Vec<AdministratorBuilder>,
    pub(crate) escalations: Vec<(FailureMatcher, String)>,
    pub(crate) startup: Vec<(String, Value)>,
    pub(crate) listeners: Vec<Arc<dyn ProcessListener>>,
}

impl OfficeBuilder {
    /// Start an office declaration under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Vec::new(),
            works: Vec::new(),
            administrators: Vec::new(),
            escalations: Vec::new(),
            startup: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Bind a managed object into the office.
    pub fn add_object(mut self, object: ObjectBuilder) -> Self {
        self.objects.push(object);
        self
    }

    /// Add a work to the office.
    pub fn add_work(mut self, work: WorkBuilder) -> Self {
        self.works.push(work);
        self
    }

    /// Add an administrator to the office.
    pub fn add_administrator(mut self, administrator: AdministratorBuilder) -> Self {
        self.administrators.push(administrator);
        self
    }

    /// Append an office-level escalation handler. Declaration order is
    /// resolution order; declare the most specific matchers first.
    pub fn escalation(mut self, matcher: FailureMatcher, task: impl Into<String>) -> Self {
        self.escalations.push((matcher, task.into()));
        self
    }

    /// Run the qualified task as a process when the floor opens.
    pub fn startup(mut self, task: impl Into<String>, parameter: Value) -> Self {
        self.startup.push((task.into(), parameter));
        self
    }

    /// Register a listener for every process journal of this office.
    pub fn listener(mut self, listener: Arc<dyn ProcessListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Declares one managed object binding.
pub struct ObjectBuilder {
    pub(crate) name: String,
    pub(crate) scope: Scope,
    pub(crate) source: Arc<dyn ManagedObjectSource>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) timeout: Duration,
    pub(crate) pool: Option<Arc<dyn ManagedObjectPool>>,
    pub(crate) recycle: Option<String>,
    pub(crate) extension: Option<ExtensionExtractor>,
    pub(crate) properties: IndexMap<String, String>,
}

impl ObjectBuilder {
    /// Bind `source` under `name` at `scope`.
    pub fn new(name: impl Into<String>, scope: Scope, source: Arc<dyn ManagedObjectSource>) -> Self {
        Self {
            name: name.into(),
            scope,
            source,
            dependencies: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            pool: None,
            recycle: None,
            extension: None,
            properties: IndexMap::new(),
        }
    }

    /// Declare a dependency on another bound object. The dependency must
    /// live at the same or a broader scope and is injected before sourcing.
    pub fn depends_on(mut self, object: impl Into<String>) -> Self {
        self.dependencies.push(object.into());
        self
    }

    /// Bound on sourcing and on asynchronous operations.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Draw instances from `pool` instead of sourcing them fresh.
    pub fn pooled(mut self, pool: Arc<dyn ManagedObjectPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Run the qualified task with the instance when the scope ends.
    pub fn recycled_by(mut self, task: impl Into<String>) -> Self {
        self.recycle = Some(task.into());
        self
    }

    /// Expose an extension handle for administration duties.
    pub fn extension(mut self, extract: impl Fn(&ManagedObject) -> Extension + Send + Sync + 'static) -> Self {
        self.extension = Some(Arc::new(extract));
        self
    }

    /// Configuration property handed to the source's `init`.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Declares one work: a named group of tasks.
pub struct WorkBuilder {
    pub(crate) name: String,
    pub(crate) initial: Option<String>,
    pub(crate) tasks: Vec<TaskBuilder>,
    pub(crate) escalations: Vec<(FailureMatcher, String)>,
}

impl WorkBuilder {
    /// Start a work declaration under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
            tasks: Vec::new(),
            escalations: Vec::new(),
        }
    }

    /// Name the task processes invoking this work start at. Defaults to the
    /// first declared task.
    pub fn initial(mut self, task: impl Into<String>) -> Self {
        self.initial = Some(task.into());
        self
    }

    /// Add a task to the work.
    pub fn add_task(mut self, task: TaskBuilder) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append a work-level escalation handler, consulted before the
    /// office's handlers for failures originating in this work.
    pub fn escalation(mut self, matcher: FailureMatcher, task: impl Into<String>) -> Self {
        self.escalations.push((matcher, task.into()));
        self
    }
}

/// Declares one task.
pub struct TaskBuilder {
    pub(crate) name: String,
    pub(crate) team: String,
    pub(crate) logic: Arc<dyn TaskLogic>,
    pub(crate) objects: Vec<String>,
    pub(crate) async_objects: Vec<String>,
    pub(crate) pre_duties: Vec<String>,
    pub(crate) post_duties: Vec<String>,
    pub(crate) next: Option<String>,
    pub(crate) flows: Vec<(String, FlowStrategy)>,
}

impl TaskBuilder {
    /// Declare a task named `name`, executed by `team`, running `logic`.
    pub fn new(name: impl Into<String>, team: impl Into<String>, logic: impl TaskLogic + 'static) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            logic: Arc::new(logic),
            objects: Vec::new(),
            async_objects: Vec::new(),
            pre_duties: Vec::new(),
            post_duties: Vec::new(),
            next: None,
            flows: Vec::new(),
        }
    }

    /// Require a bound object; the logic addresses it by declaration index.
    pub fn object(mut self, name: impl Into<String>) -> Self {
        self.objects.push(name.into());
        self
    }

    /// Require a bound object and check its async gate is idle before
    /// executing.
    pub fn async_object(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.objects.push(name.clone());
        self.async_objects.push(name);
        self
    }

    /// Run the duty (`administrator.duty`) before the body.
    pub fn pre_duty(mut self, duty: impl Into<String>) -> Self {
        self.pre_duties.push(duty.into());
        self
    }

    /// Run the duty (`administrator.duty`) after a normal return.
    pub fn post_duty(mut self, duty: impl Into<String>) -> Self {
        self.post_duties.push(duty.into());
        self
    }

    /// Run the named task next in the same flow, fed this task's return
    /// value. Unqualified names resolve within the same work.
    pub fn next(mut self, task: impl Into<String>) -> Self {
        self.next = Some(task.into());
        self
    }

    /// Declare an outbound flow link the logic instigates by index.
    pub fn flow(mut self, target: impl Into<String>, strategy: FlowStrategy) -> Self {
        self.flows.push((target.into(), strategy));
        self
    }
}

/// Declares one administrator.
pub struct AdministratorBuilder {
    pub(crate) name: String,
    pub(crate) scope: Scope,
    pub(crate) duties: Vec<DutyBuilder>,
}

impl AdministratorBuilder {
    /// Declare an administrator named `name` bound to `scope`.
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            duties: Vec::new(),
        }
    }

    /// Add a duty to the administrator.
    pub fn add_duty(mut self, duty: DutyBuilder) -> Self {
        self.duties.push(duty);
        self
    }
}

/// Declares one duty.
pub struct DutyBuilder {
    pub(crate) name: String,
    pub(crate) logic: Arc<dyn Duty>,
    pub(crate) objects: Vec<String>,
    pub(crate) flows: Vec<(String, FlowStrategy)>,
}

impl DutyBuilder {
    /// Declare a duty named `name` running `logic`.
    pub fn new(name: impl Into<String>, logic: impl Duty + 'static) -> Self {
        Self {
            name: name.into(),
            logic: Arc::new(logic),
            objects: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Administer the named object; it must expose an extension.
    pub fn administer(mut self, object: impl Into<String>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Declare an outbound flow link the duty instigates by index.
    /// Targets must be qualified (`work.task`).
    pub fn flow(mut self, target: impl Into<String>, strategy: FlowStrategy) -> Self {
        self.flows.push((target.into(), strategy));
        self
    }
}
