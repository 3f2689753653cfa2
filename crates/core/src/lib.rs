//! Domain types and pure logic for the generation job orchestrator.
//!
//! Nothing in this crate performs I/O. The job model, error
//! classification, phase weighting, primary-asset selection, the
//! session state machine and the TTL cache all live here so the
//! client, pipeline and controller crates share one definition.

pub mod assets;
pub mod cache;
pub mod classify;
pub mod error;
pub mod job;
pub mod phase;
pub mod session;
pub mod types;
