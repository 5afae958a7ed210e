//! Core runtime vocabulary: scopes, instigation strategies, and lifecycle
//! states shared between the engine and its plugins.

use serde::{Deserialize, Serialize};

/// Lifetime scope a managed object is bound to.
///
/// The scope determines which state owns the object's container and when the
/// container is released: process-bound containers live for a whole
/// invocation, thread-bound containers for one logical thread of control, and
/// work-bound containers for a single flow of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Bound to the process; released when the invocation terminates.
    Process,
    /// Bound to one logical thread inside the process.
    Thread,
    /// Bound to one flow of tasks within a thread.
    Work,
}

impl Scope {
    /// Returns the lifetime breadth of this scope; larger outlives smaller.
    fn breadth(self) -> u8 {
        match self {
            Scope::Process => 2,
            Scope::Thread => 1,
            Scope::Work => 0,
        }
    }

    /// Returns true when an object at this scope lives at least as long as
    /// one at `other`. Dependencies must point at same-or-broader scopes.
    pub fn outlives(self, other: Scope) -> bool {
        self.breadth() >= other.breadth()
    }
}

/// How a flow hands its target task to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStrategy {
    /// Run the target in the instigating flow once the current task returns,
    /// preserving ordering within the thread.
    Sequential,
    /// Run the target on a new thread state under the same process; the
    /// instigating thread does not wait.
    Parallel,
    /// Open a new flow on the owning thread and hand the target straight to
    /// its team; the instigating task does not wait for completion.
    Asynchronous,
}

/// Lifecycle state of a worker-pool team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamStatus {
    /// Not accepting assignments.
    Stopped,
    /// Accepting and executing assignments.
    Working,
}

/// Terminal outcome of a process, delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessOutcome {
    /// Every thread completed without an unhandled failure.
    Completed,
    /// An unhandled failure reached the built-in terminal handler.
    Failed {
        /// Rendered message of the terminal failure.
        message: String,
    },
    /// The external trigger was lost and the process was cancelled.
    Cancelled,
}

impl ProcessOutcome {
    /// Convenience predicate for callers that only care about success.
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed)
    }
}
