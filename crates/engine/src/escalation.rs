//! Failure escalation.
//!
//! Once a failure leaves the call frame that raised it, it travels as data: an
//! [`Escalation`] value attached to the owning thread state, resolved exactly
//! once by table lookup into an ordinary flow. Resolution order is fixed:
//! work-level handlers, then the office procedure, then the floor default,
//! then the built-in terminal handler that fails the process and releases its
//! resources. Nothing is ever retried automatically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

use crate::meta::task::TaskRef;

/// A failure in flight: the cause plus where it came from.
#[derive(Clone)]
pub struct Escalation {
    /// Qualified name of the task the failure originated from.
    pub task: String,
    /// Resolved reference of the originating task.
    pub origin: TaskRef,
    /// The cause, shared between the thread's failure slot and the handler.
    pub cause: Arc<anyhow::Error>,
    /// True when the failure arose inside an escalation-handler flow; such
    /// failures skip work- and office-level handlers to avoid looping.
    pub from_handler: bool,
    /// When the failure was raised.
    pub at: DateTime<Utc>,
}

impl Escalation {
    /// Wrap a cause raised by the named task.
    pub fn new(task: impl Into<String>, origin: TaskRef, cause: anyhow::Error, from_handler: bool) -> Self {
        Self {
            task: task.into(),
            origin,
            cause: Arc::new(cause),
            from_handler,
            at: Utc::now(),
        }
    }

    /// JSON summary handed to the handler flow as its parameter.
    pub fn summary(&self) -> Value {
        json!({
            "task": self.task,
            "message": self.cause.to_string(),
            "at": self.at.to_rfc3339(),
        })
    }
}

/// Predicate deciding whether a handler applies to a cause.
pub type FailureMatcher = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Matcher applying to causes that downcast to `E`.
pub fn match_type<E>() -> FailureMatcher
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(|cause| cause.downcast_ref::<E>().is_some())
}

/// Matcher applying to every cause.
pub fn match_any() -> FailureMatcher {
    Arc::new(|_| true)
}

/// One (matcher → flow) pair of an escalation procedure.
#[derive(Clone)]
pub struct EscalationHandler {
    matcher: FailureMatcher,
    /// Task the handler flow invokes.
    pub target: TaskRef,
}

impl EscalationHandler {
    /// Pair a matcher with a handler task.
    pub fn new(matcher: FailureMatcher, target: TaskRef) -> Self {
        Self { matcher, target }
    }

    /// Handler applying to causes that downcast to `E`.
    pub fn for_type<E>(target: TaskRef) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(match_type::<E>(), target)
    }

    /// Handler applying to every cause.
    pub fn catch_all(target: TaskRef) -> Self {
        Self::new(match_any(), target)
    }

    /// True when this handler applies to the cause.
    pub fn matches(&self, cause: &anyhow::Error) -> bool {
        (self.matcher)(cause)
    }
}

/// Ordered failure-handler table; first match wins.
#[derive(Clone, Default)]
pub struct EscalationProcedure {
    handlers: Vec<EscalationHandler>,
}

impl EscalationProcedure {
    /// An empty procedure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Order is resolution order: declare the most
    /// specific handlers first.
    pub fn push(&mut self, handler: EscalationHandler) {
        self.handlers.push(handler);
    }

    /// Find the handler flow for a cause, if any handler applies.
    pub fn resolve(&self, cause: &anyhow::Error) -> Option<TaskRef> {
        self.handlers.iter().find(|handler| handler.matches(cause)).map(|handler| handler.target)
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A failure raised while the thread's failure slot was already occupied.
///
/// The first failure stays in the slot; the newcomer is wrapped and resolved
/// through the floor-level chain only.
#[derive(Debug, Error)]
#[error("failure raised while an earlier failure was unresolved: {secondary} (earlier failure: {primary})")]
pub struct CompoundFailure {
    /// Rendered message of the failure already being handled.
    pub primary: String,
    /// Rendered message of the newly raised failure.
    pub secondary: String,
}
