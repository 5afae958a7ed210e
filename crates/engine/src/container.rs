//! Managed-object container lifecycle.
//!
//! One container exists per (scope-instance × meta-data). A container is
//! created on the first reference inside its scope, makes exactly one
//! sourcing attempt, and is destroyed when the owning scope ends, after the
//! recycle task has run and any pooled instance has been returned or
//! surrendered. Concurrent first-accessors coalesce onto the same pending
//! resolution: only the first reference triggers sourcing, everyone else
//! parks on the container and is re-assigned to its team by the resolution
//! callback.

use std::{
    sync::{Arc, Mutex, Weak, atomic::AtomicBool, atomic::Ordering},
    time::Duration,
};

use loft_types::event::ProcessEventKind;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    execute::job::Job,
    execute::process::ProcessState,
    floor::Timer,
    meta::{object::ManagedObjectMetaData, task::TaskRef},
    plugin::ManagedObject,
};

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// No reference has triggered sourcing yet.
    Unsourced,
    /// A sourcing attempt is pending resolution.
    Sourcing,
    /// An instance is available.
    Ready,
    /// The sourcing attempt failed; the cause is retained.
    Failed,
    /// The owning scope ended and the instance was released.
    Recycled,
}

/// Outcome of asking a container to be ready for a job.
pub(crate) enum Readiness {
    /// The instance is available; the job may proceed.
    Ready,
    /// The job has been parked and will be re-assigned on resolution.
    Pending,
    /// Sourcing failed; the cause escalates on the job's thread.
    Failed(Arc<anyhow::Error>),
}

/// Sourcing failure as seen by a task that was waiting on the container.
#[derive(Debug, Clone, Error)]
#[error("managed object '{object}' failed to source: {message}")]
pub struct SourcingFailure {
    /// Name of the managed object.
    pub object: String,
    /// Rendered message of the original cause.
    pub message: String,
}

/// Sourcing did not resolve within the meta-data timeout.
#[derive(Debug, Clone, Error)]
#[error("sourcing of managed object '{object}' timed out after {timeout:?}")]
pub struct SourcingTimeout {
    /// Name of the managed object.
    pub object: String,
    /// The configured bound.
    pub timeout: Duration,
}

/// An asynchronous operation on a sourced object outlived the timeout.
#[derive(Debug, Clone, Error)]
#[error("asynchronous operation on managed object '{object}' timed out after {timeout:?}")]
pub struct AsyncOperationTimeout {
    /// Name of the managed object.
    pub object: String,
    /// The configured bound.
    pub timeout: Duration,
}

struct Inner {
    state: ObjectState,
    object: Option<ManagedObject>,
    from_pool: bool,
    failure: Option<Arc<anyhow::Error>>,
    waiters: Vec<Job>,
    async_waiters: Vec<Job>,
    pending_operations: u32,
    sourcing_epoch: u64,
    operation_epoch: u64,
}

/// Container managing one sourced instance's lifecycle.
pub struct ManagedObjectContainer {
    meta: Arc<ManagedObjectMetaData>,
    process: Weak<ProcessState>,
    timer: Timer,
    inner: Mutex<Inner>,
}

impl ManagedObjectContainer {
    pub(crate) fn new(meta: Arc<ManagedObjectMetaData>, process: Weak<ProcessState>, timer: Timer) -> Arc<Self> {
        Arc::new(Self {
            meta,
            process,
            timer,
            inner: Mutex::new(Inner {
                state: ObjectState::Unsourced,
                object: None,
                from_pool: false,
                failure: None,
                waiters: Vec::new(),
                async_waiters: Vec::new(),
                pending_operations: 0,
                sourcing_epoch: 0,
                operation_epoch: 0,
            }),
        })
    }

    /// The meta-data this container was created from.
    pub fn meta(&self) -> &Arc<ManagedObjectMetaData> {
        &self.meta
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ObjectState {
        self.inner.lock().expect("container lock").state
    }

    /// The sourced instance, when the container is ready.
    pub fn object(&self) -> Option<ManagedObject> {
        self.inner.lock().expect("container lock").object.clone()
    }

    /// Trigger sourcing if no reference has done so yet. Dependencies must
    /// already be resolved; jobs guarantee this by readying containers in
    /// build-computed leaf-first order.
    pub(crate) fn source_now(self: &Arc<Self>, dependencies: Vec<ManagedObject>) {
        let (trigger, epoch) = {
            let mut inner = self.inner.lock().expect("container lock");
            if inner.state == ObjectState::Unsourced {
                inner.state = ObjectState::Sourcing;
                (true, inner.sourcing_epoch)
            } else {
                (false, 0)
            }
        };
        if !trigger {
            return;
        }

        let container = Arc::downgrade(self);
        let timeout = self.meta.timeout;
        self.timer.deadline(timeout, move || {
            if let Some(container) = container.upgrade() {
                container.sourcing_expired(epoch);
            }
        });

        if let Some(pool) = &self.meta.pool {
            match pool.source_new_object() {
                Ok(object) => self.resolve_ready(object, true),
                Err(cause) => self.resolve_failed(cause),
            }
            return;
        }

        let sourcing = Sourcing {
            shared: Arc::new(SourcingShared {
                target: SourcingTarget::Container(Arc::downgrade(self)),
                dependencies,
                fired: AtomicBool::new(false),
            }),
        };
        self.meta.source.source(sourcing);
    }

    /// Make the container ready for `waiter`, parking it when resolution is
    /// still pending.
    pub(crate) fn ensure_ready(self: &Arc<Self>, waiter: &Job, dependencies: Vec<ManagedObject>) -> Readiness {
        self.source_now(dependencies);

        let mut inner = self.inner.lock().expect("container lock");
        match inner.state {
            ObjectState::Ready => Readiness::Ready,
            ObjectState::Failed => {
                let cause = inner.failure.clone().unwrap_or_else(|| {
                    Arc::new(anyhow::anyhow!("managed object '{}' failed without a cause", self.meta.name))
                });
                Readiness::Failed(cause)
            }
            ObjectState::Sourcing => {
                inner.waiters.push(waiter.clone());
                Readiness::Pending
            }
            ObjectState::Unsourced | ObjectState::Recycled => Readiness::Failed(Arc::new(anyhow::anyhow!(
                "managed object '{}' is no longer available",
                self.meta.name
            ))),
        }
    }

    /// Check that no asynchronous operation is outstanding, parking `waiter`
    /// until the gate goes idle otherwise.
    pub(crate) fn check_async_idle(&self, waiter: &Job) -> Readiness {
        let mut inner = self.inner.lock().expect("container lock");
        match inner.state {
            ObjectState::Failed => {
                let cause = inner.failure.clone().unwrap_or_else(|| {
                    Arc::new(anyhow::anyhow!("managed object '{}' failed without a cause", self.meta.name))
                });
                Readiness::Failed(cause)
            }
            _ if inner.pending_operations == 0 => Readiness::Ready,
            _ => {
                inner.async_waiters.push(waiter.clone());
                Readiness::Pending
            }
        }
    }

    fn resolve_ready(&self, object: ManagedObject, from_pool: bool) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock");
            if inner.state != ObjectState::Sourcing {
                debug!(object = %self.meta.name, state = ?inner.state, "late sourcing resolution ignored");
                return;
            }
            inner.state = ObjectState::Ready;
            inner.object = Some(object);
            inner.from_pool = from_pool;
            inner.sourcing_epoch += 1;
            std::mem::take(&mut inner.waiters)
        };

        debug!(object = %self.meta.name, waiters = waiters.len(), "managed object sourced");
        if let Some(process) = self.process.upgrade() {
            process.record(ProcessEventKind::ObjectSourced {
                object: self.meta.name.clone(),
            });
        }
        for job in waiters {
            job.activate_or_escalate();
        }
    }

    fn resolve_failed(&self, cause: anyhow::Error) {
        let message = cause.to_string();
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock");
            if inner.state != ObjectState::Sourcing {
                debug!(object = %self.meta.name, state = ?inner.state, "late sourcing failure ignored");
                return;
            }
            inner.state = ObjectState::Failed;
            inner.failure = Some(Arc::new(cause));
            inner.sourcing_epoch += 1;
            std::mem::take(&mut inner.waiters)
        };

        warn!(object = %self.meta.name, %message, "managed object sourcing failed");
        if let Some(process) = self.process.upgrade() {
            process.record(ProcessEventKind::ObjectFailed {
                object: self.meta.name.clone(),
                message: message.clone(),
            });
        }
        for job in waiters {
            job.fail(anyhow::Error::new(SourcingFailure {
                object: self.meta.name.clone(),
                message: message.clone(),
            }));
        }
    }

    fn sourcing_expired(&self, epoch: u64) {
        let expired = {
            let inner = self.inner.lock().expect("container lock");
            inner.state == ObjectState::Sourcing && inner.sourcing_epoch == epoch
        };
        if expired {
            self.resolve_failed(anyhow::Error::new(SourcingTimeout {
                object: self.meta.name.clone(),
                timeout: self.meta.timeout,
            }));
        }
    }

    fn operation_began(self: &Arc<Self>) {
        let watchdog = {
            let mut inner = self.inner.lock().expect("container lock");
            inner.pending_operations += 1;
            (inner.pending_operations == 1).then_some(inner.operation_epoch)
        };
        if let Some(epoch) = watchdog {
            let container = Arc::downgrade(self);
            self.timer.deadline(self.meta.timeout, move || {
                if let Some(container) = container.upgrade() {
                    container.operation_expired(epoch);
                }
            });
        }
    }

    fn operation_ended(&self) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock");
            inner.pending_operations = inner.pending_operations.saturating_sub(1);
            if inner.pending_operations == 0 {
                inner.operation_epoch += 1;
                std::mem::take(&mut inner.async_waiters)
            } else {
                Vec::new()
            }
        };
        for job in waiters {
            job.activate_or_escalate();
        }
    }

    fn operation_expired(&self, epoch: u64) {
        let waiters = {
            let mut inner = self.inner.lock().expect("container lock");
            if inner.pending_operations > 0 && inner.operation_epoch == epoch {
                std::mem::take(&mut inner.async_waiters)
            } else {
                Vec::new()
            }
        };
        if waiters.is_empty() {
            return;
        }
        warn!(object = %self.meta.name, "asynchronous operation timed out");
        for job in waiters {
            job.fail(anyhow::Error::new(AsyncOperationTimeout {
                object: self.meta.name.clone(),
                timeout: self.meta.timeout,
            }));
        }
    }

    /// Release the container at the end of its owning scope.
    ///
    /// The recycle task (if configured) runs first, then a pooled instance is
    /// returned to the pool, or surrendered when `lost` is set. Safe to call
    /// more than once; only the first call releases.
    pub(crate) fn unload(&self, lost: bool, run_recycle: &dyn Fn(TaskRef, &ManagedObject)) {
        let (object, from_pool, failure) = {
            let mut inner = self.inner.lock().expect("container lock");
            if inner.state == ObjectState::Recycled {
                return;
            }
            inner.state = ObjectState::Recycled;
            inner.sourcing_epoch += 1;
            (inner.object.take(), inner.from_pool, inner.failure.clone())
        };

        let Some(object) = object else { return };

        if let Some(recycle) = self.meta.recycle {
            run_recycle(recycle, &object);
        }

        if from_pool && let Some(pool) = &self.meta.pool {
            if lost {
                debug!(object = %self.meta.name, "surrendering pooled instance");
                pool.lost_object(object, failure.as_deref());
            } else {
                debug!(object = %self.meta.name, "returning pooled instance");
                pool.return_object(object);
            }
        }
    }
}

enum SourcingTarget {
    Container(Weak<ManagedObjectContainer>),
    Channel(Mutex<Option<oneshot::Sender<anyhow::Result<ManagedObject>>>>),
}

struct SourcingShared {
    target: SourcingTarget,
    dependencies: Vec<ManagedObject>,
    fired: AtomicBool,
}

/// Single-resolution handle a source resolves exactly once.
///
/// The handle may be cloned and moved to any thread; only the first of
/// `set_object`/`set_failure` takes effect, later calls are ignored and
/// logged.
#[derive(Clone)]
pub struct Sourcing {
    shared: Arc<SourcingShared>,
}

impl Sourcing {
    pub(crate) fn detached(sender: oneshot::Sender<anyhow::Result<ManagedObject>>, dependencies: Vec<ManagedObject>) -> Self {
        Self {
            shared: Arc::new(SourcingShared {
                target: SourcingTarget::Channel(Mutex::new(Some(sender))),
                dependencies,
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Injected dependency instance, in declared order.
    pub fn dependency(&self, index: usize) -> Option<ManagedObject> {
        self.shared.dependencies.get(index).cloned()
    }

    /// Gate for asynchronous operations the sourced object performs later.
    pub fn async_gate(&self) -> AsyncGate {
        let container = match &self.shared.target {
            SourcingTarget::Container(container) => container.clone(),
            SourcingTarget::Channel(_) => Weak::new(),
        };
        AsyncGate { container }
    }

    /// Resolve the sourcing with an instance.
    pub fn set_object(&self, object: ManagedObject) {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            debug!("sourcing already resolved; extra set_object ignored");
            return;
        }
        match &self.shared.target {
            SourcingTarget::Container(container) => {
                if let Some(container) = container.upgrade() {
                    container.resolve_ready(object, false);
                }
            }
            SourcingTarget::Channel(sender) => {
                if let Some(sender) = sender.lock().expect("sourcing channel lock").take() {
                    let _ = sender.send(Ok(object));
                }
            }
        }
    }

    /// Resolve the sourcing with a failure.
    pub fn set_failure(&self, cause: anyhow::Error) {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            debug!("sourcing already resolved; extra set_failure ignored");
            return;
        }
        match &self.shared.target {
            SourcingTarget::Container(container) => {
                if let Some(container) = container.upgrade() {
                    container.resolve_failed(cause);
                }
            }
            SourcingTarget::Channel(sender) => {
                if let Some(sender) = sender.lock().expect("sourcing channel lock").take() {
                    let _ = sender.send(Err(cause));
                }
            }
        }
    }
}

/// Begin/end bracket for asynchronous operations on a sourced object.
///
/// Tasks flagged to check the gate park until every begun operation has
/// ended; expiry of the meta-data timeout escalates on the parked tasks.
#[derive(Clone)]
pub struct AsyncGate {
    container: Weak<ManagedObjectContainer>,
}

impl AsyncGate {
    /// Record the start of an asynchronous operation.
    pub fn begin(&self) {
        if let Some(container) = self.container.upgrade() {
            container.operation_began();
        }
    }

    /// Record the completion of an asynchronous operation.
    pub fn end(&self) {
        if let Some(container) = self.container.upgrade() {
            container.operation_ended();
        }
    }
}

/// Lazily-populated container table for one scope instance.
///
/// Containers are created on first reference and enumerated at scope end for
/// unloading, matching the bound meta-data table computed at build.
pub(crate) struct ContainerTable {
    metas: Arc<Vec<Arc<ManagedObjectMetaData>>>,
    slots: Vec<once_cell::sync::OnceCell<Arc<ManagedObjectContainer>>>,
    process: Weak<ProcessState>,
    timer: Timer,
}

impl ContainerTable {
    pub(crate) fn new(metas: Arc<Vec<Arc<ManagedObjectMetaData>>>, process: Weak<ProcessState>, timer: Timer) -> Self {
        let slots = (0..metas.len()).map(|_| once_cell::sync::OnceCell::new()).collect();
        Self {
            metas,
            slots,
            process,
            timer,
        }
    }

    /// The container at `index`, created on first reference.
    pub(crate) fn container(&self, index: usize) -> Arc<ManagedObjectContainer> {
        self.slots[index]
            .get_or_init(|| ManagedObjectContainer::new(self.metas[index].clone(), self.process.clone(), self.timer.clone()))
            .clone()
    }

    /// Unload every container that was created in this scope instance.
    pub(crate) fn unload(&self, lost: bool, run_recycle: &dyn Fn(TaskRef, &ManagedObject)) {
        for slot in &self.slots {
            if let Some(container) = slot.get() {
                container.unload(lost, run_recycle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{ManagedObjectPool, ManagedObjectSource};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct ImmediateSource;

    impl ManagedObjectSource for ImmediateSource {
        fn source(&self, sourcing: Sourcing) {
            sourcing.set_object(Arc::new("instance".to_string()));
        }
    }

    struct CountingPool {
        acquired: AtomicUsize,
        returned: AtomicUsize,
        lost: AtomicUsize,
    }

    impl CountingPool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                acquired: AtomicUsize::new(0),
                returned: AtomicUsize::new(0),
                lost: AtomicUsize::new(0),
            })
        }
    }

    impl ManagedObjectPool for CountingPool {
        fn source_new_object(&self) -> anyhow::Result<ManagedObject> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(42u32))
        }

        fn return_object(&self, _object: ManagedObject) {
            self.returned.fetch_add(1, Ordering::SeqCst);
        }

        fn lost_object(&self, _object: ManagedObject, _cause: Option<&anyhow::Error>) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn meta_with(pool: Option<Arc<dyn ManagedObjectPool>>, recycle: Option<TaskRef>) -> Arc<ManagedObjectMetaData> {
        Arc::new(ManagedObjectMetaData {
            name: "connection".into(),
            scope: loft_types::Scope::Process,
            source: Arc::new(ImmediateSource),
            dependencies: Vec::new(),
            load_order: Vec::new(),
            timeout: Duration::from_secs(5),
            pool,
            recycle,
            extension: None,
        })
    }

    #[tokio::test]
    async fn sourcing_resolves_once_and_reaches_ready() {
        let timer = Timer::new(tokio::runtime::Handle::current());
        let container = ManagedObjectContainer::new(meta_with(None, None), Weak::new(), timer);

        assert_eq!(container.state(), ObjectState::Unsourced);
        container.source_now(Vec::new());
        assert_eq!(container.state(), ObjectState::Ready);
        assert!(container.object().is_some());

        // A second trigger must not source again or disturb the state.
        container.source_now(Vec::new());
        assert_eq!(container.state(), ObjectState::Ready);
    }

    #[tokio::test]
    async fn pooled_sourcing_acquires_and_returns() {
        let pool = CountingPool::new();
        let timer = Timer::new(tokio::runtime::Handle::current());
        let container = ManagedObjectContainer::new(meta_with(Some(pool.clone()), None), Weak::new(), timer);

        container.source_now(Vec::new());
        assert_eq!(pool.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(container.state(), ObjectState::Ready);

        container.unload(false, &|_, _| {});
        assert_eq!(pool.returned.load(Ordering::SeqCst), 1);
        assert_eq!(pool.lost.load(Ordering::SeqCst), 0);
        assert_eq!(container.state(), ObjectState::Recycled);

        // Releasing twice must not double-return.
        container.unload(false, &|_, _| {});
        assert_eq!(pool.returned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lost_scope_surrenders_the_pooled_instance() {
        let pool = CountingPool::new();
        let timer = Timer::new(tokio::runtime::Handle::current());
        let container = ManagedObjectContainer::new(meta_with(Some(pool.clone()), None), Weak::new(), timer);

        container.source_now(Vec::new());
        container.unload(true, &|_, _| {});
        assert_eq!(pool.returned.load(Ordering::SeqCst), 0);
        assert_eq!(pool.lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recycle_runs_before_release() {
        let pool = CountingPool::new();
        let timer = Timer::new(tokio::runtime::Handle::current());
        let container = ManagedObjectContainer::new(meta_with(Some(pool.clone()), Some(TaskRef(3))), Weak::new(), timer);

        container.source_now(Vec::new());
        let recycled = AtomicUsize::new(0);
        container.unload(false, &|task, _object| {
            assert_eq!(task, TaskRef(3));
            // The pool must not have seen the instance back yet.
            assert_eq!(pool.returned.load(Ordering::SeqCst), 0);
            recycled.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
        assert_eq!(pool.returned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detached_sourcing_resolves_exactly_once() {
        let (sender, receiver) = oneshot::channel();
        let sourcing = Sourcing::detached(sender, vec![Arc::new(7u8) as ManagedObject]);

        assert!(sourcing.dependency(0).is_some());
        assert!(sourcing.dependency(1).is_none());

        sourcing.set_object(Arc::new("first".to_string()));
        sourcing.set_failure(anyhow::anyhow!("late failure is ignored"));

        let resolved = receiver.await.expect("resolution delivered");
        let object = resolved.expect("first resolution wins");
        assert_eq!(*object.downcast::<String>().expect("string instance"), "first");
    }
}
