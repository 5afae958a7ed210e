//! # Loft Engine
//!
//! An embeddable execution engine composing scoped, asynchronously-sourced
//! resources ("managed objects") and pluggable worker pools ("teams") into
//! request pipelines. An application declares which tasks exist, which
//! objects each task needs, which team executes it, and how failures are
//! handled; the engine executes the resolved graph with resource-lifetime
//! and failure-propagation guarantees.
//!
//! ## Key properties
//!
//! - **At-most-once sourcing**: concurrent first references to an object
//!   coalesce onto one sourcing attempt and observe the same outcome.
//! - **No blocked workers**: a task waiting on a resolving container parks on
//!   the container and is re-assigned to its team by the resolution callback,
//!   possibly onto a different worker.
//! - **Failures as data**: a failure leaving its call frame becomes an
//!   escalation value resolved exactly once by table lookup into an ordinary
//!   flow: work handlers first, then the office procedure, the floor
//!   default, and the built-in terminal handler.
//! - **Deterministic release**: process termination always releases
//!   process-scoped containers, through the pool's lost path when the
//!   process was cancelled or failed.
//!
//! ## Usage
//!
//! ```rust
//! use loft_engine::{OfficeBuilder, OfficeFloorBuilder, PassiveTeam, TaskBuilder, WorkBuilder};
//! use serde_json::{Value, json};
//!
//! let office = OfficeBuilder::new("greetings").add_work(
//!     WorkBuilder::new("hello").add_task(TaskBuilder::new("say", "main", |context: &mut loft_engine::TaskContext| {
//!         Ok(json!({ "greeting": format!("hello {}", context.parameter()) }))
//!     })),
//! );
//! let mut floor = OfficeFloorBuilder::new()
//!     .add_team("main", PassiveTeam::new("main"))
//!     .add_office(office)
//!     .build()?;
//! floor.open()?;
//!
//! let office = floor.office("greetings").expect("office registered");
//! let manager = office.function_manager("hello.say")?;
//! manager.invoke_process(Value::String("world".into()), None)?;
//! floor.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`build`**: builders resolving a declarative floor description into the
//!   immutable meta-data graph, with all validation up front
//! - **`meta`**: the resolved graph (objects, tasks, flows, administrators)
//! - **`container`**: managed-object lifecycle, pooling, and async gating
//! - **`execute`**: the scheduler itself: jobs, flows, threads, processes
//! - **`team`**: worker-pool implementations and the lifecycle registry
//! - **`escalation`**: failure values and the ordered handler procedure
//! - **`office`** / **`floor`**: registries and the open/close lifecycle

pub mod build;
pub mod container;
pub mod error;
pub mod escalation;
pub mod execute;
pub mod floor;
pub mod meta;
pub mod observe;
pub mod office;
pub mod plugin;
pub mod team;

pub use build::{AdministratorBuilder, DutyBuilder, ObjectBuilder, OfficeBuilder, OfficeFloorBuilder, TaskBuilder, WorkBuilder};
pub use container::{AsyncGate, ManagedObjectContainer, ObjectState, Sourcing, SourcingFailure, SourcingTimeout};
pub use error::{AssignError, BuildError, InvokeError};
pub use escalation::{CompoundFailure, Escalation, EscalationHandler, EscalationProcedure, FailureMatcher, match_any, match_type};
pub use execute::context::{DutyContext, TaskContext};
pub use execute::job::Job;
pub use floor::OfficeFloor;
pub use office::{FunctionManager, Office, ProcessHandle};
pub use plugin::{
    CompletionCallback, Duty, Extension, ManagedObject, ManagedObjectPool, ManagedObjectSource, ProcessListener, SourceContext,
    TaskLogic, Team,
};
pub use team::{PassiveTeam, PooledTeam, TeamRegistry};

// The shared vocabulary crate, re-exported for embedders.
pub use loft_types::{FlowStrategy, ProcessEvent, ProcessEventKind, ProcessOutcome, Scope, TeamStatus};
