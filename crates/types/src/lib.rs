//! Shared type definitions for the Loft runtime.
//!
//! The models defined here are the vocabulary spoken across the build layer,
//! the execution engine, and embedding applications: object scopes, flow
//! instigation strategies, team lifecycle states, process outcomes, and the
//! journal events emitted while a process runs. They carry no behavior of
//! their own so that plugins and diagnostic surfaces can depend on them
//! without pulling in the engine.

pub mod event;
pub mod model;

pub use event::{ProcessEvent, ProcessEventKind};
pub use model::{FlowStrategy, ProcessOutcome, Scope, TeamStatus};
