//! Worker-pool teams.
//!
//! A team is the pluggable execution substrate of the engine: jobs that are
//! ready to run are handed to the team of their task and the team decides
//! which worker runs them. Two implementations ship with the engine (a
//! bounded multi-worker pool and a passive team that borrows the caller's
//! thread), plus the registry the floor uses to bracket team lifecycles.

pub mod passive;
pub mod pooled;
pub mod registry;

pub use passive::PassiveTeam;
pub use pooled::PooledTeam;
pub use registry::TeamRegistry;
