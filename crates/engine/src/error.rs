//! Error types for the Loft engine.
//!
//! Three taxonomies cover the engine's own failure surface: `BuildError` for
//! configuration problems caught before any task runs, `AssignError` for team
//! refusals at the point of assignment, and `InvokeError` for the management
//! API. Application failures (task, duty, and sourcing logic) travel as
//! `anyhow::Error` values through the escalation procedure instead.

use loft_types::Scope;
use thiserror::Error;

/// Configuration errors detected while building an office floor.
///
/// Every variant is fatal: `build` returns the first problem it finds and no
/// partial runtime is created.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate team name: {name}")]
    DuplicateTeam { name: String },

    #[error("duplicate office name: {name}")]
    DuplicateOffice { name: String },

    #[error("office '{office}' declares duplicate managed object '{name}'")]
    DuplicateObject { office: String, name: String },

    #[error("office '{office}' declares duplicate work '{name}'")]
    DuplicateWork { office: String, name: String },

    #[error("office '{office}' declares duplicate task '{name}'")]
    DuplicateTask { office: String, name: String },

    #[error("office '{office}' declares duplicate administrator '{name}'")]
    DuplicateAdministrator { office: String, name: String },

    #[error("office '{office}' declares duplicate duty '{name}'")]
    DuplicateDuty { office: String, name: String },

    #[error("task '{task}' in office '{office}' is assigned to unknown team '{team}'")]
    UnknownTeam { office: String, task: String, team: String },

    #[error("'{referrer}' in office '{office}' references unknown managed object '{object}'")]
    UnknownObject {
        office: String,
        referrer: String,
        object: String,
    },

    #[error("'{referrer}' in office '{office}' references unknown task '{task}'")]
    UnknownTask {
        office: String,
        referrer: String,
        task: String,
    },

    #[error("task '{task}' in office '{office}' references unknown duty '{duty}'")]
    UnknownDuty { office: String, task: String, duty: String },

    #[error(
        "managed object '{object}' at {scope:?} scope cannot depend on '{dependency}' at narrower {dependency_scope:?} scope"
    )]
    ScopeViolation {
        office: String,
        object: String,
        scope: Scope,
        dependency: String,
        dependency_scope: Scope,
    },

    #[error("cycle detected among managed objects in office '{office}': {objects}")]
    DependencyCycle { office: String, objects: String },

    #[error("duty '{duty}' in office '{office}' administers object '{object}' which exposes no extension")]
    MissingExtension {
        office: String,
        duty: String,
        object: String,
    },

    #[error("work '{work}' in office '{office}' declares no tasks")]
    EmptyWork { office: String, work: String },

    #[error("source for managed object '{object}' in office '{office}' failed to initialise: {reason}")]
    SourceInit {
        office: String,
        object: String,
        reason: String,
    },

    #[error("default escalation references unknown office '{office}'")]
    UnknownEscalationOffice { office: String },

    #[error("failed to start the engine timer runtime: {reason}")]
    Runtime { reason: String },
}

impl BuildError {
    /// Create an unknown-object error.
    pub fn unknown_object(office: impl Into<String>, referrer: impl Into<String>, object: impl Into<String>) -> Self {
        Self::UnknownObject {
            office: office.into(),
            referrer: referrer.into(),
            object: object.into(),
        }
    }

    /// Create an unknown-task error.
    pub fn unknown_task(office: impl Into<String>, referrer: impl Into<String>, task: impl Into<String>) -> Self {
        Self::UnknownTask {
            office: office.into(),
            referrer: referrer.into(),
            task: task.into(),
        }
    }

    /// Create an unknown-team error.
    pub fn unknown_team(office: impl Into<String>, task: impl Into<String>, team: impl Into<String>) -> Self {
        Self::UnknownTeam {
            office: office.into(),
            task: task.into(),
            team: team.into(),
        }
    }

    /// Create a source-initialisation error.
    pub fn source_init(office: impl Into<String>, object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceInit {
            office: office.into(),
            object: object.into(),
            reason: reason.into(),
        }
    }
}

/// Failures surfaced at the point a job is handed to a team.
///
/// Refusal is explicit and immediate; the engine never retries an assignment
/// on the caller's behalf.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignError {
    #[error("team '{team}' is saturated and refused the assignment")]
    Overloaded { team: String },

    #[error("team '{team}' is not working")]
    Stopped { team: String },
}

impl AssignError {
    /// Create an overload refusal for the named team.
    pub fn overloaded(team: impl Into<String>) -> Self {
        Self::Overloaded { team: team.into() }
    }

    /// Create a stopped refusal for the named team.
    pub fn stopped(team: impl Into<String>) -> Self {
        Self::Stopped { team: team.into() }
    }
}

/// Errors returned synchronously from the management API.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("unknown managed object: {name}")]
    UnknownObject { name: String },

    #[error("the office floor is not open")]
    NotOpen,

    #[error("initial assignment refused: {0}")]
    Assignment(#[from] AssignError),

    #[error("ad-hoc sourcing of '{name}' failed: {reason}")]
    Sourcing { name: String, reason: String },
}

impl InvokeError {
    /// Create an unknown-function error.
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }

    /// Create an unknown-object error.
    pub fn unknown_object(name: impl Into<String>) -> Self {
        Self::UnknownObject { name: name.into() }
    }

    /// Create an ad-hoc sourcing error.
    pub fn sourcing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sourcing {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_renders_scope_violation() {
        let error = BuildError::ScopeViolation {
            office: "orders".into(),
            object: "session".into(),
            scope: Scope::Process,
            dependency: "request".into(),
            dependency_scope: Scope::Work,
        };
        let rendered = error.to_string();
        assert!(rendered.contains("session"), "unexpected message: {rendered}");
        assert!(rendered.contains("narrower"), "unexpected message: {rendered}");
    }

    #[test]
    fn assign_error_constructors() {
        assert!(matches!(AssignError::overloaded("fast"), AssignError::Overloaded { .. }));
        assert!(matches!(AssignError::stopped("fast"), AssignError::Stopped { .. }));
    }

    #[test]
    fn invoke_error_wraps_assignment() {
        let error = InvokeError::from(AssignError::overloaded("fast"));
        assert!(matches!(error, InvokeError::Assignment(AssignError::Overloaded { .. })));
    }
}
