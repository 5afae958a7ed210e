//! Flow meta-data: a resolved link from one task to another.

use loft_types::FlowStrategy;

use crate::meta::task::TaskRef;

/// One outbound flow link, resolved at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMetaData {
    /// Task the flow instigates.
    pub target: TaskRef,
    /// How the target is handed to the runtime.
    pub strategy: FlowStrategy,
}
