//! Journal events recorded while a process runs.
//!
//! Every process keeps an ordered journal of what happened to it: which
//! managed objects were sourced, which tasks ran, which failures escalated,
//! and how the process ended. Listeners receive these events as they are
//! recorded; diagnostic surfaces can serialize them as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded occurrence within a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// Identifier of the process the event belongs to.
    pub process_id: u64,
    /// What happened.
    pub kind: ProcessEventKind,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
}

/// The kinds of events a process journal records.
///
/// For any single task the journal preserves a fixed ordering: the
/// instantiation events of the objects it requires come first, then its
/// invocation event, then any escalation it raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessEventKind {
    /// A managed-object container transitioned to ready.
    ObjectSourced {
        /// Name of the managed object that was sourced.
        object: String,
    },
    /// A managed-object sourcing attempt failed.
    ObjectFailed {
        /// Name of the managed object whose sourcing failed.
        object: String,
        /// Rendered failure message.
        message: String,
    },
    /// A task body was invoked.
    TaskInvoked {
        /// Qualified task name, `work.task`.
        task: String,
    },
    /// A failure was raised and handed to the escalation procedure.
    EscalationRaised {
        /// Qualified name of the task the failure originated from.
        task: String,
        /// Rendered failure message.
        message: String,
    },
    /// The process reached a terminal state.
    ProcessCompleted {
        /// True when no unhandled failure terminated the process.
        success: bool,
    },
}

impl ProcessEvent {
    /// Stamps an event with the current time.
    pub fn now(process_id: u64, kind: ProcessEventKind) -> Self {
        Self {
            process_id,
            kind,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_through_json() {
        let event = ProcessEvent::now(
            7,
            ProcessEventKind::TaskInvoked {
                task: "orders.place".into(),
            },
        );
        let json = serde_json::to_string(&event).expect("serialize event");
        let back: ProcessEvent = serde_json::from_str(&json).expect("deserialize event");
        assert_eq!(back, event);
    }

    #[test]
    fn kind_tag_is_snake_case() {
        let event = ProcessEvent::now(1, ProcessEventKind::ProcessCompleted { success: true });
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["kind"]["kind"], "process_completed");
    }
}
