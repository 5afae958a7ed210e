//! Process journals and listener fan-out.
//!
//! Each process keeps an ordered journal of its observable events. The
//! structural guarantees of the scheduler give the journal a fixed shape per
//! task: instantiation events for the task's objects land before its
//! invocation event, and any escalation the task raises lands after. The
//! completion event is always last.

use std::sync::{Arc, Mutex};

use loft_types::event::{ProcessEvent, ProcessEventKind};

use crate::plugin::ProcessListener;

/// Ordered event record for one process, fanned out to listeners as written.
pub(crate) struct Journal {
    process_id: u64,
    events: Mutex<Vec<ProcessEvent>>,
    listeners: Arc<Vec<Arc<dyn ProcessListener>>>,
}

impl Journal {
    pub(crate) fn new(process_id: u64, listeners: Arc<Vec<Arc<dyn ProcessListener>>>) -> Self {
        Self {
            process_id,
            events: Mutex::new(Vec::new()),
            listeners,
        }
    }

    /// Append an event and notify listeners, outside the journal lock.
    pub(crate) fn record(&self, kind: ProcessEventKind) {
        let event = ProcessEvent::now(self.process_id, kind);
        {
            let mut events = self.events.lock().expect("journal lock");
            events.push(event.clone());
        }
        for listener in self.listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// Snapshot of everything recorded so far, in order.
    pub(crate) fn snapshot(&self) -> Vec<ProcessEvent> {
        self.events.lock().expect("journal lock").clone()
    }
}
