//! `governor_core`: the multi-agent governance and finality engine.
//!
//! A proposal enters through [`bus`], is admitted or rejected by
//! [`governance`] against the per-scope [`state_machine`] and [`policy`],
//! and its effects land in the bitemporal knowledge [`graph`] via
//! [`graph::facts_sync`]. [`finality`] and [`convergence`] score how close a
//! scope is to done; [`watchdog`] raises a question when a scope goes quiet
//! without getting there; [`hatchery`] keeps the worker roles that feed the
//! pipeline sized to demand. [`wal`] and [`dedup`] give every component a
//! durable, exactly-once-effect audit trail to build on.

pub mod bus;
pub mod config;
pub mod convergence;
pub mod dedup;
pub mod error;
pub mod finality;
pub mod governance;
pub mod graph;
pub mod hatchery;
pub mod metrics;
pub mod policy;
pub mod state_machine;
pub mod types;
pub mod wal;
pub mod watchdog;

pub use error::{GovernorError, GovernorResult};
