//! Preprocessing pipeline for generation jobs.
//!
//! Runs the ordered client-side phases (persist draft, resolve
//! prerequisites, acquire source images, composite, upload) and submits
//! the job once they all succeed. The collaborators it needs are traits in
//! [`stores`]; [`http`] implements them over the backend REST API and
//! [`memory`] implements them in process.

pub mod composite;
pub mod error;
pub mod http;
pub mod memory;
pub mod pipeline;
pub mod request;
pub mod stores;
