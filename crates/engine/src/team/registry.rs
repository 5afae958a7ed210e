//! Team lifecycle registry.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use loft_types::TeamStatus;
use tracing::{debug, warn};

use crate::{error::BuildError, plugin::Team};

struct TeamEntry {
    team: Arc<dyn Team>,
    status: TeamStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

/// Named registry of every team on the floor, tracking lifecycle state.
///
/// The floor drives `start_all`/`stop_all` around its open/close lifecycle;
/// offices hold direct `Arc<dyn Team>` references resolved at build and never
/// look teams up by name at runtime.
#[derive(Default)]
pub struct TeamRegistry {
    entries: IndexMap<String, TeamEntry>,
}

impl TeamRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, name: String, team: Arc<dyn Team>) -> Result<(), BuildError> {
        if self.entries.contains_key(&name) {
            return Err(BuildError::DuplicateTeam { name });
        }
        self.entries.insert(
            name,
            TeamEntry {
                team,
                status: TeamStatus::Stopped,
                started_at: None,
                stopped_at: None,
            },
        );
        Ok(())
    }

    /// Start every team in registration order. On failure the teams already
    /// started are stopped again and the error is returned.
    pub(crate) fn start_all(&mut self) -> Result<()> {
        for index in 0..self.entries.len() {
            let failure = {
                let (name, entry) = self.entries.get_index_mut(index).expect("registered team entry");
                match entry.team.start_working() {
                    Ok(()) => {
                        entry.status = TeamStatus::Working;
                        entry.started_at = Some(Utc::now());
                        debug!(team = %name, "team started");
                        None
                    }
                    Err(error) => Some((name.clone(), error)),
                }
            };
            if let Some((name, error)) = failure {
                warn!(team = %name, %error, "team failed to start");
                self.stop_all();
                return Err(error.context(format!("team '{name}' failed to start")));
            }
        }
        Ok(())
    }

    /// Stop every working team in reverse registration order, letting each
    /// drain in-flight work.
    pub(crate) fn stop_all(&mut self) {
        for index in (0..self.entries.len()).rev() {
            let (name, entry) = self.entries.get_index_mut(index).expect("registered team entry");
            if entry.status == TeamStatus::Stopped {
                continue;
            }
            entry.team.stop_working();
            entry.status = TeamStatus::Stopped;
            entry.stopped_at = Some(Utc::now());
            debug!(team = %name, "team stopped");
        }
    }

    /// Lifecycle status of a registered team.
    pub fn status(&self, name: &str) -> Option<TeamStatus> {
        self.entries.get(name).map(|entry| entry.status)
    }

    /// When the team last started working, if it ever has.
    pub fn started_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).and_then(|entry| entry.started_at)
    }

    /// The registered team, for resolution at build time.
    pub(crate) fn team(&self, name: &str) -> Option<Arc<dyn Team>> {
        self.entries.get(name).map(|entry| entry.team.clone())
    }

    /// Registered team names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::passive::PassiveTeam;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TeamRegistry::new();
        registry
            .register("fast".into(), PassiveTeam::new("fast"))
            .expect("first registration");
        let error = registry
            .register("fast".into(), PassiveTeam::new("fast"))
            .expect_err("duplicate registration");
        assert!(matches!(error, BuildError::DuplicateTeam { .. }));
    }

    #[test]
    fn start_and_stop_toggle_status() {
        let mut registry = TeamRegistry::new();
        registry
            .register("fast".into(), PassiveTeam::new("fast"))
            .expect("registration");

        assert_eq!(registry.status("fast"), Some(TeamStatus::Stopped));
        registry.start_all().expect("start teams");
        assert_eq!(registry.status("fast"), Some(TeamStatus::Working));
        assert!(registry.started_at("fast").is_some());

        registry.stop_all();
        assert_eq!(registry.status("fast"), Some(TeamStatus::Stopped));
    }

    #[test]
    fn unknown_team_has_no_status() {
        let registry = TeamRegistry::new();
        assert_eq!(registry.status("missing"), None);
    }
}
