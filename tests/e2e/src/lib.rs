//! End-to-end tests driving full pipelines over the in-memory collaborators
//! `governor-core` ships for exactly this purpose. Gated behind the `e2e`
//! feature so `cargo test --workspace` stays fast; run with
//! `cargo test -p governor-e2e --features e2e`.
//!
//! Each module below exercises one concrete end-to-end scenario: a
//! contradiction that blocks finality, a drift-driven rejection, a
//! confidence ratchet across repeated fact extraction, and so on.

#![cfg(feature = "e2e")]

mod convergence_scenarios;
mod facts_sync_ratchet;
mod governance_pipeline;
mod watchdog_quiescence;
