//! Immutable meta-data graph the engine executes.
//!
//! Meta-data is produced once by the build layer with every name already
//! resolved to an index; the runtime never performs a lookup by name. The
//! structures here are shared behind `Arc` between the office, its processes,
//! and every job they schedule.

pub mod admin;
pub mod flow;
pub mod object;
pub mod task;

pub use admin::{AdministratorMetaData, DutyMetaData};
pub use flow::FlowMetaData;
pub use object::{ExtensionExtractor, ManagedObjectMetaData, ObjectRef};
pub use task::{DutyRef, TaskMetaData, TaskRef, WorkMetaData};
