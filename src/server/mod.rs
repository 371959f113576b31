//! HTTP API surface for the surrounding application.
//!
//! This module is a transport adapter over the session manager; the
//! operation contracts themselves live in [`crate::session`].

mod handler;

pub use handler::{AppState, router, run};
