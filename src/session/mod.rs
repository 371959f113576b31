//! Session model, policy constants, and lifecycle management.
//!
//! A playground session is one ephemeral sandbox container plus its metadata
//! record. The record's logical deadline (`expires_at`) is the only thing
//! that decides whether a session is alive; the store's own TTL is
//! deliberately longer and exists purely as a backstop against abandoned
//! files (see [`STORAGE_TTL`]).
//!
//! # Lifecycle
//!
//! ```text
//! Provisioning ──► Running ──► Expired ──┐
//!                     │                  ├──► Terminated (evicted)
//!                     └─────► Stopped ───┘
//! ```
//!
//! - `Running → Expired` is discovered lazily, on any read that finds
//!   `now > expires_at`, and cascades to stop-and-evict.
//! - `Running → Stopped` happens on explicit stop, or when a status check
//!   finds the container dead out-of-band.
//! - Once evicted, the identifier answers "not found" everywhere,
//!   indistinguishable from an id that never existed.

mod cleanup;
mod lifecycle;
mod store;

pub use lifecycle::{ExecResult, ExtendOutcome, ProvisionedSession, SessionManager, StatusView};
pub use store::SessionStore;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sandbox::ResourcePolicy;

/// Unique identifier for a session; doubles as the container name.
pub type SessionId = uuid::Uuid;

/// Minimum requested session duration (1 hour).
pub const MIN_DURATION: Duration = Duration::from_secs(3600);

/// Hard cap on total session lifetime (4 hours), enforced at creation and on
/// every extension.
pub const MAX_DURATION: Duration = Duration::from_secs(4 * 3600);

/// Grace period between logical expiry and the teardown timer firing.
pub const CLEANUP_BUFFER: Duration = Duration::from_secs(60);

/// Storage TTL handed to the session store on every write.
///
/// Strictly greater than [`MAX_DURATION`] + [`CLEANUP_BUFFER`]: the store
/// must never be the party that decides a session is over, so no record may
/// vanish from storage before the lifecycle controller has had a chance to
/// observe its logical expiry.
pub const STORAGE_TTL: Duration = Duration::from_secs(5 * 3600);

/// Length of the generated per-session credential secret.
pub const CREDENTIAL_LEN: usize = 20;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Sandbox is provisioned and within its logical lifetime.
    Running,
    /// Logical deadline has passed.
    Expired,
    /// Sandbox was stopped, explicitly or out-of-band.
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Expired => write!(f, "expired"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The persistent record for one playground session.
///
/// The credential secret is intentionally absent: it is injected into the
/// sandbox during provisioning, returned once in the start result, and never
/// stored in retrievable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique session identifier.
    pub id: SessionId,

    /// Caller-supplied owner id; opaque to this subsystem.
    pub owner_user_id: String,

    /// Caller-supplied owner name; opaque to this subsystem.
    pub owner_username: String,

    /// When the session was provisioned. Set once.
    pub created_at: DateTime<Utc>,

    /// Logical deadline. Advanced only by the extend operation.
    pub expires_at: DateTime<Utc>,

    /// Last observed state. Container liveness is the ground truth and is
    /// re-checked against the runtime on read.
    pub status: SessionStatus,
}

impl SessionRecord {
    /// Creates a running record expiring `duration` from now.
    #[must_use]
    pub fn new(
        id: SessionId,
        owner_user_id: impl Into<String>,
        owner_username: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::hours(1));

        Self {
            id,
            owner_user_id: owner_user_id.into(),
            owner_username: owner_username.into(),
            created_at: now,
            expires_at,
            status: SessionStatus::Running,
        }
    }

    /// Returns true if the logical deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Remaining time before the logical deadline, `None` once expired.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        let now = Utc::now();
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Total lifetime from creation to the current deadline.
    #[must_use]
    pub fn lifetime(&self) -> chrono::Duration {
        self.expires_at - self.created_at
    }
}

/// Configuration for the session manager.
///
/// # Example
///
/// ```
/// use playground_sessions::session::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_image("alpine:3.19")
///     .with_data_dir("/var/lib/playgrounds");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base image for playground containers.
    pub image: String,

    /// Directory for session records.
    ///
    /// Defaults to `$XDG_DATA_HOME/playground-sessions` or
    /// `~/.playground-sessions`.
    pub data_dir: PathBuf,

    /// Resource limits applied to every container.
    pub policy: ResourcePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: String::from("alpine:3.20"),
            data_dir: store::default_data_dir(),
            policy: ResourcePolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets the session record directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the container resource policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = policy;
        self
    }
}
