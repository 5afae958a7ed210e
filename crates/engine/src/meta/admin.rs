//! Administrator and duty meta-data.

use std::sync::Arc;

use loft_types::Scope;

use crate::{
    meta::{flow::FlowMetaData, object::ObjectRef},
    plugin::Duty,
};

/// Immutable description of an administrator: a named group of duties bound
/// to a scope.
pub struct AdministratorMetaData {
    /// Administrator name, unique within the office.
    pub name: String,
    /// Scope the administrator is bound to (Process or Work).
    pub scope: Scope,
    /// The duties, addressed by index from task meta-data.
    pub duties: Vec<DutyMetaData>,
}

/// Immutable description of one duty.
pub struct DutyMetaData {
    /// Duty name, unique within its administrator.
    pub name: String,
    /// The duty logic.
    pub logic: Arc<dyn Duty>,
    /// Objects the duty administers; each must expose an extension.
    pub objects: Vec<ObjectRef>,
    /// Outbound flow links the duty may instigate by index.
    pub flows: Vec<FlowMetaData>,
}
