//! Job store client and polling engine.
//!
//! Provides the typed REST wrapper for the job store, the [`JobClient`]
//! seam the rest of the workspace programs against, the job-type-agnostic
//! [`PollingEngine`], backend configuration, and an in-memory job store
//! for offline runs and tests.
//!
//! [`JobClient`]: client::JobClient
//! [`PollingEngine`]: polling::PollingEngine

pub mod api;
pub mod client;
pub mod config;
pub mod memory;
pub mod polling;
