//! burrow-core - the environment and package management engine.
//!
//! # Architecture
//!
//! - [`resolver`] turns requested specs plus an environment baseline into a
//!   single consistent version assignment (backtracking constraint search).
//! - [`plan`] diffs that target against the recorded state into an ordered
//!   operation list.
//! - [`install`] executes a plan transactionally: everything stages first,
//!   the live tree mutates only at commit, and the state file write is the
//!   single durability point.
//! - [`state`] is the durable `name==version` record owned by an
//!   [`environment::Environment`].
//! - [`source`] abstracts where versions, metadata, and artifacts come from;
//!   the engine never talks to the network directly.
//! - [`ops`] wires the above into the user-level install/uninstall flows,
//!   including the re-plan loop for stale baselines.

pub mod config;
pub mod environment;
pub mod install;
pub mod io;
pub mod lock;
pub mod ops;
pub mod paths;
pub mod plan;
pub mod resolver;
pub mod source;
pub mod state;

pub use paths::*;

/// User Agent string for network operations
pub const USER_AGENT: &str = concat!("burrow/", env!("CARGO_PKG_VERSION"));
