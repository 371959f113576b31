//! Session lifecycle management.
//!
//! This module provides the `SessionManager` type: provisioning, status,
//! in-sandbox command execution, extension, explicit stop, and the cleanup
//! entry point that armed timers fire into.
//!
//! # Validation on every call
//!
//! Every public operation re-validates session state when it runs; none
//! assumes a prior check still holds, because time passes between calls.
//! A read that discovers `now > expires_at` tears the session down on the
//! spot and answers "not found", deliberately indistinguishable from an id
//! that never existed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::sandbox::provision::{self, BootstrapReport};
use crate::sandbox::runtime::ContainerRuntime;
use crate::session::store::SessionStore;
use crate::session::{
    CLEANUP_BUFFER, CREDENTIAL_LEN, MAX_DURATION, MIN_DURATION, STORAGE_TTL, SessionConfig,
    SessionId, SessionRecord, SessionStatus, cleanup,
};

/// A freshly provisioned session, including the plaintext credential secret.
///
/// The secret appears here and nowhere else: it is not persisted and cannot
/// be retrieved again after this value is dropped.
#[derive(Debug, Clone)]
pub struct ProvisionedSession {
    /// The stored session record.
    pub record: SessionRecord,
    /// Generated access credential, shown exactly once.
    pub credential_secret: String,
    /// Per-step bootstrap outcome; failed steps mean a degraded sandbox.
    pub bootstrap: BootstrapReport,
}

/// Point-in-time view of a session returned by `status`.
#[derive(Debug, Clone)]
pub struct StatusView {
    /// Observed state at the time of the call.
    pub status: SessionStatus,
    /// Current logical deadline.
    pub expires_at: DateTime<Utc>,
    /// Time left before the deadline; zero once stopped.
    pub time_remaining: Duration,
}

/// Aggregated result of one in-sandbox command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Standard output followed by standard error, trimmed.
    pub output: String,
    /// Child exit status; 137 when the command was killed at the timeout.
    pub exit_code: i32,
    /// True when the command hit the execution timeout.
    pub timed_out: bool,
}

/// Result of a successful extension.
#[derive(Debug, Clone)]
pub struct ExtendOutcome {
    /// The new logical deadline.
    pub expires_at: DateTime<Utc>,
    /// Time left before the new deadline.
    pub time_remaining: Duration,
}

/// Drives every playground session from provisioning to teardown.
///
/// Cloning is cheap (the manager is a handle around shared state) and is how
/// cleanup timers carry it onto their threads.
///
/// # Example
///
/// ```no_run
/// use playground_sessions::sandbox::DockerRuntime;
/// use playground_sessions::session::{SessionConfig, SessionManager};
///
/// let manager = SessionManager::new(
///     Box::new(DockerRuntime::new()),
///     SessionConfig::default(),
/// ).unwrap();
///
/// let session = manager.start("u-1", "alice", 3600).unwrap();
/// println!("secret (shown once): {}", session.credential_secret);
///
/// let result = manager.execute(session.record.id, "uname -a").unwrap();
/// println!("{}", result.output);
///
/// manager.stop(session.record.id).unwrap();
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    runtime: Box<dyn ContainerRuntime>,
    store: SessionStore,
    config: SessionConfig,
    // Serializes read-modify-write cycles against the store (extend).
    write_lock: Mutex<()>,
}

impl SessionManager {
    /// Creates a manager over the given runtime, opening the record store
    /// under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the data directory cannot be created.
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let store = SessionStore::open(&config.data_dir)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                runtime,
                store,
                config,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Provisions a new playground session.
    ///
    /// Creates the container, runs the in-sandbox bootstrap (best-effort),
    /// stores the record, and arms the cleanup timer. The returned
    /// credential secret is shown exactly once.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `SessionError::DurationOutOfRange` for durations outside [1h, 4h]
    /// - `SessionError::Runtime` if the image pull or container creation fails
    /// - `SessionError::Store` if the record cannot be written
    #[instrument(skip(self, owner_user_id, owner_username))]
    pub fn start(
        &self,
        owner_user_id: &str,
        owner_username: &str,
        duration_secs: u64,
    ) -> Result<ProvisionedSession, SessionError> {
        if duration_secs < MIN_DURATION.as_secs() || duration_secs > MAX_DURATION.as_secs() {
            return Err(SessionError::DurationOutOfRange {
                seconds: duration_secs,
                min: MIN_DURATION.as_secs(),
                max: MAX_DURATION.as_secs(),
            });
        }
        let duration = Duration::from_secs(duration_secs);

        let id = Uuid::new_v4();
        let secret = generate_secret(CREDENTIAL_LEN);
        debug!(%id, "provisioning playground session");

        let image = &self.inner.config.image;
        if !self.inner.runtime.image_exists(image)? {
            info!(%image, "base image missing locally, pulling");
            self.inner.runtime.pull_image(image)?;
        }

        self.inner
            .runtime
            .create(&id.to_string(), image, &self.inner.config.policy)?;

        let bootstrap = provision::bootstrap(self.inner.runtime.as_ref(), &id.to_string(), &secret);
        if !bootstrap.fully_provisioned() {
            warn!(%id, ?bootstrap, "session provisioned in degraded mode");
        }

        let record = SessionRecord::new(id, owner_user_id, owner_username, duration);
        if let Err(e) = self.inner.store.put(&record, STORAGE_TTL) {
            // Without a record the container would leak; take it down now.
            warn!(%id, error = %e, "failed to store session record, stopping container");
            if let Err(stop_err) = self.inner.runtime.stop(&id.to_string()) {
                warn!(%id, error = %stop_err, "failed to stop container after store failure");
            }
            return Err(e);
        }

        self.arm_cleanup(id, duration + CLEANUP_BUFFER);

        info!(%id, owner = owner_username, expires_at = %record.expires_at, "session started");
        Ok(ProvisionedSession {
            record,
            credential_secret: secret,
            bootstrap,
        })
    }

    /// Reports the session's current state.
    ///
    /// Container liveness is the ground truth: a record whose container died
    /// out-of-band is reported `stopped` once (with the cascade to eviction),
    /// after which the id answers "not found".
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown or expired ids.
    #[instrument(skip(self))]
    pub fn status(&self, id: SessionId) -> Result<StatusView, SessionError> {
        let record = self.load_live(id)?;

        if !self.inner.runtime.is_running(&record.id.to_string())? {
            info!(%id, "container no longer running, evicting session");
            self.teardown(&record, SessionStatus::Stopped);
            return Ok(StatusView {
                status: SessionStatus::Stopped,
                expires_at: record.expires_at,
                time_remaining: Duration::ZERO,
            });
        }

        Ok(StatusView {
            status: SessionStatus::Running,
            expires_at: record.expires_at,
            time_remaining: record.time_remaining().unwrap_or(Duration::ZERO),
        })
    }

    /// Runs one shell command inside the sandbox.
    ///
    /// A command that hits the execution timeout is a completed call, not an
    /// error: the result carries whatever output was captured, with
    /// `timed_out` set.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown or expired ids, or
    /// `SessionError::Runtime` if the command cannot be spawned.
    #[instrument(skip(self, command))]
    pub fn execute(&self, id: SessionId, command: &str) -> Result<ExecResult, SessionError> {
        let record = self.load_live(id)?;

        let output = self.inner.runtime.exec(&record.id.to_string(), command)?;
        if output.timed_out {
            debug!(%id, "command hit the execution timeout");
        }

        Ok(ExecResult {
            output: output.combined(),
            exit_code: output.exit_code,
            timed_out: output.timed_out,
        })
    }

    /// Extends the session's logical deadline by whole hours.
    ///
    /// The new total lifetime must stay within the 4-hour cap; violating
    /// requests are rejected with no state change. Accepting re-arms the
    /// cleanup timer for the new deadline; earlier timers stay armed and
    /// re-validate harmlessly when they fire.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `SessionError::NotFound` for unknown or expired ids
    /// - `SessionError::ExtensionOutOfRange` for hours outside [1, 4]
    /// - `SessionError::CapExceeded` if the total would pass the cap
    #[instrument(skip(self))]
    pub fn extend(
        &self,
        id: SessionId,
        additional_hours: u64,
    ) -> Result<ExtendOutcome, SessionError> {
        if !(1..=4).contains(&additional_hours) {
            return Err(SessionError::ExtensionOutOfRange {
                hours: additional_hours,
            });
        }

        // Fetch-then-store under the write lock; concurrent readers are
        // last-writer-wins by design.
        let _guard = self.write_guard();

        let mut record = self.load_live(id)?;

        let new_expires_at = record.expires_at + chrono::Duration::hours(additional_hours as i64);
        let cap = chrono::Duration::from_std(MAX_DURATION).unwrap_or(chrono::Duration::hours(4));
        if new_expires_at - record.created_at > cap {
            return Err(SessionError::CapExceeded {
                cap_hours: MAX_DURATION.as_secs() / 3600,
            });
        }

        record.expires_at = new_expires_at;
        self.inner.store.put(&record, STORAGE_TTL)?;

        let fire_after = record.time_remaining().unwrap_or(Duration::ZERO) + CLEANUP_BUFFER;
        self.arm_cleanup(id, fire_after);

        info!(%id, expires_at = %record.expires_at, "session extended");
        Ok(ExtendOutcome {
            expires_at: record.expires_at,
            time_remaining: record.time_remaining().unwrap_or(Duration::ZERO),
        })
    }

    /// Stops a session explicitly.
    ///
    /// The container stop is best-effort; eviction of the record is
    /// unconditional. A second stop on the same id answers "not found".
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown ids.
    #[instrument(skip(self))]
    pub fn stop(&self, id: SessionId) -> Result<(), SessionError> {
        let record = self.inner.store.get(id)?.ok_or(SessionError::NotFound)?;
        self.teardown(&record, SessionStatus::Stopped);
        Ok(())
    }

    /// Cleanup entry point, called when an armed timer fires.
    ///
    /// At-least-once semantics: firing is harmless regardless of what
    /// happened since arming. A record that is still within its deadline
    /// (the timer predates an extension) is left alone; an absent record
    /// only gets a best-effort container stop; an expired record is torn
    /// down.
    #[instrument(skip(self))]
    pub fn reap(&self, id: SessionId) {
        match self.inner.store.get(id) {
            Ok(Some(record)) => {
                if record.is_expired() {
                    debug!(%id, "cleanup timer firing for expired session");
                    self.teardown(&record, SessionStatus::Expired);
                } else {
                    debug!(%id, expires_at = %record.expires_at, "cleanup timer fired early, session still valid");
                }
            }
            Ok(None) => {
                // Already evicted by stop or expiry discovery; make sure the
                // container is gone too.
                if let Err(e) = self.inner.runtime.stop(&id.to_string()) {
                    debug!(%id, error = %e, "post-eviction container stop failed");
                }
            }
            Err(e) => warn!(%id, error = %e, "cleanup timer could not read session record"),
        }
    }

    /// Arms a fire-once cleanup timer for this session.
    pub fn arm_cleanup(&self, id: SessionId, fire_after: Duration) {
        cleanup::arm(self.clone(), id, fire_after);
    }

    /// Re-arms cleanup for every record that survived a restart.
    ///
    /// Armed timers do not outlive the process; without this, sessions
    /// started before a restart would only ever be reaped lazily. Records
    /// already past their deadline get a timer one buffer out, so they are
    /// torn down shortly after boot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the store cannot be scanned.
    pub fn recover(&self) -> Result<usize, SessionError> {
        let ids = self.inner.store.sweep()?;
        let count = ids.len();

        for id in ids {
            let Some(record) = self.inner.store.get(id)? else {
                continue;
            };
            let fire_after = record.time_remaining().unwrap_or(Duration::ZERO) + CLEANUP_BUFFER;
            self.arm_cleanup(id, fire_after);
        }

        if count > 0 {
            info!(count, "re-armed cleanup for recovered sessions");
        }
        Ok(count)
    }

    /// Returns the underlying record store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    /// Returns the manager configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Loads a record, lazily discovering expiry.
    ///
    /// Expired records are torn down on the spot and reported as not found.
    fn load_live(&self, id: SessionId) -> Result<SessionRecord, SessionError> {
        let record = self.inner.store.get(id)?.ok_or(SessionError::NotFound)?;

        if record.is_expired() {
            debug!(%id, "session discovered expired");
            self.teardown(&record, SessionStatus::Expired);
            return Err(SessionError::NotFound);
        }

        Ok(record)
    }

    /// Best-effort container stop plus unconditional record eviction.
    fn teardown(&self, record: &SessionRecord, final_status: SessionStatus) {
        if let Err(e) = self.inner.runtime.stop(&record.id.to_string()) {
            warn!(id = %record.id, error = %e, "failed to stop container during teardown");
        }

        // Eviction happens regardless of stop success.
        if let Err(e) = self.inner.store.evict(record.id) {
            warn!(id = %record.id, error = %e, "failed to evict session record");
        }

        debug!(id = %record.id, status = %final_status, "session terminated");
    }

    fn write_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("image", &self.inner.config.image)
            .field("data_dir", &self.inner.config.data_dir)
            .finish()
    }
}

/// Generates a fixed-length alphanumeric credential secret.
fn generate_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
