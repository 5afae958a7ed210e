//! Managed-object meta-data.

use std::{sync::Arc, time::Duration};

use loft_types::Scope;

use crate::{
    meta::task::TaskRef,
    plugin::{Extension, ManagedObject, ManagedObjectPool, ManagedObjectSource},
};

/// Resolved reference to a bound managed object: which scope table owns the
/// container and at which index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Scope table the container lives in.
    pub scope: Scope,
    /// Index into that scope's bound-object table.
    pub index: usize,
}

/// Extracts the duty-facing extension handle from a sourced instance.
pub type ExtensionExtractor = Arc<dyn Fn(&ManagedObject) -> Extension + Send + Sync>;

/// Immutable description of one bound managed object.
pub struct ManagedObjectMetaData {
    /// Name the object was bound under, used in events and diagnostics.
    pub name: String,
    /// Scope the object is bound to.
    pub scope: Scope,
    /// Source supplying instances.
    pub source: Arc<dyn ManagedObjectSource>,
    /// Direct dependencies, injected before this object is sourced.
    pub dependencies: Vec<ObjectRef>,
    /// Dependencies in leaf-first order followed by this object itself.
    /// Computed once at build; jobs ready containers in exactly this order.
    pub load_order: Vec<ObjectRef>,
    /// Bound on sourcing and on any asynchronous operation.
    pub timeout: Duration,
    /// Pool instances circulate through, when the object is pooled.
    pub pool: Option<Arc<dyn ManagedObjectPool>>,
    /// Task run with the instance when the owning scope ends.
    pub recycle: Option<TaskRef>,
    /// Extension extractor for administration duties.
    pub extension: Option<ExtensionExtractor>,
}
