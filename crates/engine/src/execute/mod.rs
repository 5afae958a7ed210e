//! The scheduler core.
//!
//! A [`job::Job`](job::Job) is the schedulable unit: it readies the
//! containers its task needs (parking on any that are still sourcing), runs
//! pre-duties, the task body, and post-duties, then processes the flow
//! instigations the body queued. Jobs belong to a [`flow::FlowState`], flows
//! to a [`thread::ThreadState`], threads to a [`process::ProcessState`];
//! completion bubbles up that chain and resources are released at each scope
//! boundary.

pub mod context;
pub mod flow;
pub mod job;
pub mod process;
pub mod thread;
