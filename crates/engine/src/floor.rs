//! The office floor: top-level runtime lifecycle.
//!
//! The floor owns every team and office. `open` starts the teams, starts the
//! managed-object sources, and runs each office's startup flows; `close`
//! refuses further invocation and lets in-flight work drain through the
//! teams. The floor is an explicit value owned by the embedding application;
//! there is no ambient global state.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{office::Office, plugin::SourceContext, team::registry::TeamRegistry};

/// Shared handle onto the engine-owned timer runtime.
///
/// Sourcing and async-operation watchdogs run here so that a deferred
/// resolution can never occupy a team worker.
#[derive(Clone)]
pub struct Timer {
    handle: tokio::runtime::Handle,
}

impl Timer {
    pub(crate) fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Run `callback` once `after` has elapsed.
    pub(crate) fn deadline(&self, after: Duration, callback: impl FnOnce() + Send + 'static) {
        self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FloorState {
    Closed,
    Open,
}

/// Top-level runtime owning all teams and offices.
pub struct OfficeFloor {
    teams: TeamRegistry,
    offices: IndexMap<String, Arc<Office>>,
    timer_runtime: Option<tokio::runtime::Runtime>,
    state: FloorState,
}

impl std::fmt::Debug for OfficeFloor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficeFloor")
            .field("offices", &self.offices.keys().collect::<Vec<_>>())
            .field("state", &self.state)
            .finish()
    }
}

impl OfficeFloor {
    pub(crate) fn new(teams: TeamRegistry, offices: IndexMap<String, Arc<Office>>, timer_runtime: tokio::runtime::Runtime) -> Self {
        Self {
            teams,
            offices,
            timer_runtime: Some(timer_runtime),
            state: FloorState::Closed,
        }
    }

    /// The named office, when it exists.
    pub fn office(&self, name: &str) -> Option<Arc<Office>> {
        self.offices.get(name).cloned()
    }

    /// Office names in declaration order.
    pub fn office_names(&self) -> impl Iterator<Item = &str> {
        self.offices.keys().map(String::as_str)
    }

    /// The team registry, for lifecycle status queries.
    pub fn teams(&self) -> &TeamRegistry {
        &self.teams
    }

    /// Start all teams, start every managed-object source, then run each
    /// office's startup flows. Idempotent once open.
    pub fn open(&mut self) -> Result<()> {
        if self.state == FloorState::Open {
            return Ok(());
        }

        self.teams.start_all()?;

        for office in self.offices.values() {
            office.set_open(true);
            let context = SourceContext::new(Arc::downgrade(office));
            for meta in office.all_object_metas() {
                if let Err(error) = meta.source.start(&context) {
                    for office in self.offices.values() {
                        office.set_open(false);
                    }
                    self.teams.stop_all();
                    return Err(error).with_context(|| format!("source for managed object '{}' failed to start", meta.name));
                }
            }
        }

        for office in self.offices.values() {
            if let Err(error) = office.run_startup() {
                for office in self.offices.values() {
                    office.set_open(false);
                }
                self.teams.stop_all();
                return Err(anyhow::Error::new(error)).with_context(|| format!("startup flows of office '{}' failed", office.name()));
            }
        }

        self.state = FloorState::Open;
        info!(offices = self.offices.len(), "office floor open");
        Ok(())
    }

    /// Refuse further invocation, stop all teams (draining in-flight work),
    /// and shut the timer runtime down. Idempotent once closed.
    pub fn close(&mut self) {
        if self.state == FloorState::Closed && self.timer_runtime.is_none() {
            return;
        }

        for office in self.offices.values() {
            office.set_open(false);
        }
        self.teams.stop_all();
        if let Some(runtime) = self.timer_runtime.take() {
            runtime.shutdown_background();
        }
        self.state = FloorState::Closed;
        debug!("office floor closed");
    }
}

impl Drop for OfficeFloor {
    fn drop(&mut self) {
        self.close();
    }
}
