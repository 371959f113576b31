//! Error types for the playground session manager.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Session lifecycle error
    #[error("session operation failed")]
    #[diagnostic(code(playground::session))]
    Session(#[from] SessionError),

    /// Container engine error
    #[error("container engine operation failed")]
    #[diagnostic(code(playground::runtime))]
    Runtime(#[from] RuntimeError),

    /// HTTP server error
    #[error("HTTP server error")]
    #[diagnostic(code(playground::server))]
    Server(#[from] ServerError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(playground::io))]
    Io(#[from] std::io::Error),
}

/// Errors from the container engine client.
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// The engine binary could not be spawned at all
    #[error("failed to spawn {binary}: {context}")]
    #[diagnostic(
        code(playground::runtime::spawn),
        help("check that the container engine binary is installed and on PATH")
    )]
    Spawn {
        binary: String,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An engine invocation exited unsuccessfully
    #[error("container engine command failed: {context}")]
    #[diagnostic(code(playground::runtime::command))]
    CommandFailed { context: String },

    /// Waiting on a supervised child process failed
    #[error("failed to wait for child process: {context}")]
    #[diagnostic(code(playground::runtime::wait))]
    Wait { context: String },
}

/// Errors from session lifecycle operations.
#[derive(Error, Debug, Diagnostic)]
pub enum SessionError {
    /// Unknown, malformed, or expired session id.
    ///
    /// Deliberately a single opaque variant: callers must not be able to
    /// distinguish "never existed" from "existed but expired".
    #[error("playground session not found")]
    #[diagnostic(code(playground::session::not_found))]
    NotFound,

    /// Requested session duration outside the allowed range
    #[error("session duration {seconds}s is outside the allowed range [{min}s, {max}s]")]
    #[diagnostic(
        code(playground::session::duration),
        help("request a duration between 1 and 4 hours")
    )]
    DurationOutOfRange { seconds: u64, min: u64, max: u64 },

    /// Requested extension outside the allowed range
    #[error("extension of {hours}h is outside the allowed range [1h, 4h]")]
    #[diagnostic(code(playground::session::extension))]
    ExtensionOutOfRange { hours: u64 },

    /// Extension accepted range-wise but total lifetime would pass the cap
    #[error("extension would put total session lifetime past the {cap_hours}h cap")]
    #[diagnostic(
        code(playground::session::cap),
        help("stop this session and start a new one instead")
    )]
    CapExceeded { cap_hours: u64 },

    /// Session store I/O failure
    #[error("session store I/O failed: {context}")]
    #[diagnostic(code(playground::session::store))]
    Store {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored session record could not be decoded
    #[error("session record is corrupted: {reason}")]
    #[diagnostic(code(playground::session::corrupt))]
    Corrupt { reason: String },

    /// Infrastructure failure from the container engine
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors related to the HTTP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("failed to bind {addr}")]
    #[diagnostic(code(playground::server::bind))]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server terminated abnormally
    #[error("server terminated: {0}")]
    #[diagnostic(code(playground::server::serve))]
    Serve(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
