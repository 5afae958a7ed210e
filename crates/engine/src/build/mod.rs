//! Build-time configuration of an office floor.
//!
//! The builders collect a declarative description of teams, offices, works,
//! tasks, managed objects, administrators, and escalation handlers;
//! [`OfficeFloorBuilder::build`](builders::OfficeFloorBuilder::build)
//! resolves every name to an index, validates scopes, cycles, and extension
//! availability, and produces the immutable runtime, or fails with a
//! [`BuildError`](crate::error::BuildError) before any task runs. Nothing is
//! looked up by name after this point.

pub mod builders;
mod validate;

pub use builders::{
    AdministratorBuilder, DutyBuilder, ObjectBuilder, OfficeBuilder, OfficeFloorBuilder, TaskBuilder, WorkBuilder,
};
