//! Ephemeral playground sandbox sessions.
//!
//! This crate provisions isolated, time-boxed compute environments backed by
//! a container engine, issues per-session credentials, executes shell
//! commands inside the sandbox under a hard timeout, and guarantees eventual
//! teardown even when the client never stops the session.
//!
//! # Architecture
//!
//! - [`sandbox`]: container engine client, resource policy, command
//!   supervision, and the in-sandbox bootstrap sequence
//! - [`session`]: session records, the file-backed store, the lifecycle
//!   controller, and delayed cleanup timers
//! - [`server`]: HTTP boundary for the surrounding application
//!
//! # Example
//!
//! ```no_run
//! use playground_sessions::sandbox::DockerRuntime;
//! use playground_sessions::session::{SessionConfig, SessionManager};
//!
//! fn main() -> miette::Result<()> {
//!     let manager = SessionManager::new(
//!         Box::new(DockerRuntime::new()),
//!         SessionConfig::default(),
//!     )?;
//!
//!     let session = manager.start("u-1", "alice", 3600)?;
//!     println!("session {}", session.record.id);
//!     println!("secret (shown once): {}", session.credential_secret);
//!
//!     let result = manager.execute(session.record.id, "echo hello")?;
//!     println!("{}", result.output);
//!
//!     manager.stop(session.record.id)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod sandbox;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use error::{Error, Result};
pub use sandbox::{ContainerRuntime, DockerRuntime, ExecOutput, ResourcePolicy};
pub use session::{SessionConfig, SessionManager, SessionRecord, SessionStatus};
