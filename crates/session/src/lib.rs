//! Generation session controller.
//!
//! Owns the one-session-per-entity guard, wires the preprocessing
//! pipeline to trigger and polling, and turns terminal outcomes into
//! reports, user notices and entity follow-ups.

pub mod controller;
pub mod error;
pub mod events;
pub mod guard;
pub mod notice;
pub mod outcome;
