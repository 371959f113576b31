//! File-backed session store.
//!
//! One JSON envelope per session id under the data directory. Pure key-value
//! semantics: put, get, evict. The envelope carries its own storage deadline,
//! set far beyond the maximum logical session lifetime; `get` treats a record
//! past that deadline as absent. Whether a session is *valid* is never
//! decided here: that comparison against `expires_at` belongs to the
//! lifecycle controller alone.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

use crate::error::SessionError;
use crate::session::{SessionId, SessionRecord};

/// Directory permissions: owner read/write/execute only (0700).
#[cfg(unix)]
const DIR_PERMISSIONS: u32 = 0o700;

/// On-disk envelope wrapping a session record with its storage deadline.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    record: SessionRecord,
    stored_at: DateTime<Utc>,
    storage_expires_at: DateTime<Utc>,
}

/// Key-value store for session records.
#[derive(Debug)]
pub struct SessionStore {
    data_dir: PathBuf,
    // Serializes file operations within this process. Concurrent writers to
    // the same record are last-writer-wins at the record level.
    lock: Mutex<()>,
}

impl SessionStore {
    /// Opens (and creates if needed) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let data_dir = data_dir.into();
        ensure_data_dir(&data_dir)?;
        Ok(Self {
            data_dir,
            lock: Mutex::new(()),
        })
    }

    /// Writes a record, replacing any previous version, with the given
    /// storage TTL.
    ///
    /// The write is atomic: a temp file is written, synced, and renamed over
    /// the target so a crash never leaves a half-written record.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if serialization or I/O fails.
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub fn put(&self, record: &SessionRecord, storage_ttl: Duration) -> Result<(), SessionError> {
        let now = Utc::now();
        let envelope = StoredRecord {
            record: record.clone(),
            stored_at: now,
            storage_expires_at: now
                + chrono::Duration::from_std(storage_ttl).unwrap_or(chrono::Duration::hours(5)),
        };

        let json = serde_json::to_string_pretty(&envelope).map_err(|e| SessionError::Store {
            context: String::from("failed to serialize session record"),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let path = self.record_path(record.id);
        let temp_path = path.with_extension("json.tmp");

        let _guard = self.lock_guard();

        let mut file = fs::File::create(&temp_path).map_err(|e| SessionError::Store {
            context: format!("failed to create temp record file: {}", temp_path.display()),
            source: e,
        })?;

        file.write_all(json.as_bytes())
            .map_err(|e| SessionError::Store {
                context: format!("failed to write record: {}", temp_path.display()),
                source: e,
            })?;

        file.sync_all().map_err(|e| SessionError::Store {
            context: String::from("failed to sync record file"),
            source: e,
        })?;

        fs::rename(&temp_path, &path).map_err(|e| SessionError::Store {
            context: format!(
                "failed to rename temp file {} to {}",
                temp_path.display(),
                path.display()
            ),
            source: e,
        })?;

        trace!("record written");
        Ok(())
    }

    /// Retrieves a record, or `None` for unknown ids and records past their
    /// storage deadline (the latter are removed on the way out).
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on I/O failure or
    /// `SessionError::Corrupt` if the record cannot be decoded.
    #[instrument(skip(self))]
    pub fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, SessionError> {
        let path = self.record_path(id);

        let _guard = self.lock_guard();

        if !path.exists() {
            trace!("record not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| SessionError::Store {
            context: format!("failed to read record file: {}", path.display()),
            source: e,
        })?;

        let envelope: StoredRecord =
            serde_json::from_str(&content).map_err(|e| SessionError::Corrupt {
                reason: format!("failed to parse session record JSON: {e}"),
            })?;

        if envelope.record.id != id {
            return Err(SessionError::Corrupt {
                reason: format!(
                    "record id mismatch: expected {}, got {}",
                    id, envelope.record.id
                ),
            });
        }

        if Utc::now() > envelope.storage_expires_at {
            // Nothing evaluated this session for hours past its maximum
            // possible logical lifetime; the backstop applies.
            debug!(%id, "storage TTL elapsed, dropping record");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(envelope.record))
    }

    /// Removes a record. Missing ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if removal fails for a present record.
    #[instrument(skip(self))]
    pub fn evict(&self, id: SessionId) -> Result<(), SessionError> {
        let path = self.record_path(id);

        let _guard = self.lock_guard();

        if !path.exists() {
            trace!("record already evicted");
            return Ok(());
        }

        fs::remove_file(&path).map_err(|e| SessionError::Store {
            context: format!("failed to remove record file: {}", path.display()),
            source: e,
        })?;

        debug!(%id, "record evicted");
        Ok(())
    }

    /// IDs of every record currently on disk, dropping envelopes past their
    /// storage deadline along the way.
    ///
    /// Startup recovery only; listing is not part of the store's key-value
    /// contract.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the directory scan fails.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> Result<Vec<SessionId>, SessionError> {
        let mut ids = Vec::new();

        for entry in WalkDir::new(&self.data_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = uuid::Uuid::parse_str(stem) else {
                continue;
            };

            // get() applies the storage deadline and removes stale files.
            if self.get(id)?.is_some() {
                ids.push(id);
            }
        }

        trace!(count = ids.len(), "swept session records");
        Ok(ids)
    }

    /// Returns the store's data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, id: SessionId) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    fn lock_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the file-level atomicity still holds, so recover and continue.
        self.lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Returns the default directory for session records.
///
/// Uses `XDG_DATA_HOME` if set, otherwise falls back to
/// `~/.playground-sessions`, then `/tmp/playground-sessions`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("playground-sessions");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".playground-sessions");
    }

    PathBuf::from("/tmp/playground-sessions")
}

/// Ensures the data directory exists with restrictive permissions.
fn ensure_data_dir(data_dir: &Path) -> Result<(), SessionError> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir).map_err(|e| SessionError::Store {
            context: format!("failed to create data directory: {}", data_dir.display()),
            source: e,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(DIR_PERMISSIONS);
            fs::set_permissions(data_dir, permissions).map_err(|e| SessionError::Store {
                context: format!(
                    "failed to set permissions on data directory: {}",
                    data_dir.display()
                ),
                source: e,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use uuid::Uuid;

    fn test_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    fn test_record() -> SessionRecord {
        SessionRecord::new(
            Uuid::new_v4(),
            "u-1",
            "alice",
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (store, _dir) = test_store();
        let record = test_record();

        store
            .put(&record, Duration::from_secs(3600))
            .expect("put failed");

        let loaded = store
            .get(record.id)
            .expect("get failed")
            .expect("record missing");

        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.owner_username, "alice");
        assert_eq!(loaded.created_at, record.created_at);
        assert_eq!(loaded.expires_at, record.expires_at);
        assert_eq!(loaded.status, SessionStatus::Running);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let (store, _dir) = test_store();
        let result = store.get(Uuid::new_v4()).expect("get failed");
        assert!(result.is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let (store, _dir) = test_store();
        let mut record = test_record();

        store
            .put(&record, Duration::from_secs(3600))
            .expect("first put failed");

        record.expires_at += chrono::Duration::seconds(600);
        store
            .put(&record, Duration::from_secs(3600))
            .expect("second put failed");

        let loaded = store
            .get(record.id)
            .expect("get failed")
            .expect("record missing");
        assert_eq!(loaded.expires_at, record.expires_at);
    }

    #[test]
    fn test_evict_idempotent() {
        let (store, _dir) = test_store();
        let record = test_record();

        store
            .put(&record, Duration::from_secs(3600))
            .expect("put failed");

        store.evict(record.id).expect("first evict failed");
        store.evict(record.id).expect("second evict failed");

        assert!(store.get(record.id).expect("get failed").is_none());
    }

    #[test]
    fn test_storage_ttl_drops_record() {
        let (store, _dir) = test_store();
        let record = test_record();

        store
            .put(&record, Duration::from_millis(1))
            .expect("put failed");

        std::thread::sleep(Duration::from_millis(10));

        assert!(store.get(record.id).expect("get failed").is_none());
        // The stale file is gone, not just hidden.
        assert!(!store.data_dir().join(format!("{}.json", record.id)).exists());
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let (store, _dir) = test_store();
        let id = Uuid::new_v4();

        fs::write(store.data_dir().join(format!("{id}.json")), "not json").expect("write");

        let result = store.get(id);
        assert!(matches!(result, Err(SessionError::Corrupt { .. })));
    }

    #[test]
    fn test_id_mismatch_is_corrupt() {
        let (store, _dir) = test_store();
        let record = test_record();
        store
            .put(&record, Duration::from_secs(3600))
            .expect("put failed");

        // File renamed under a different id.
        let other = Uuid::new_v4();
        fs::rename(
            store.data_dir().join(format!("{}.json", record.id)),
            store.data_dir().join(format!("{other}.json")),
        )
        .expect("rename");

        let result = store.get(other);
        assert!(matches!(result, Err(SessionError::Corrupt { .. })));
    }

    #[test]
    fn test_sweep_lists_live_records() {
        let (store, _dir) = test_store();
        let r1 = test_record();
        let r2 = test_record();
        let stale = test_record();

        store.put(&r1, Duration::from_secs(3600)).expect("put r1");
        store.put(&r2, Duration::from_secs(3600)).expect("put r2");
        store
            .put(&stale, Duration::from_millis(1))
            .expect("put stale");

        std::thread::sleep(Duration::from_millis(10));

        let ids = store.sweep().expect("sweep failed");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&r1.id));
        assert!(ids.contains(&r2.id));
        assert!(!ids.contains(&stale.id));
    }

    #[test]
    fn test_sweep_ignores_foreign_files() {
        let (store, _dir) = test_store();
        fs::write(store.data_dir().join("notes.txt"), "hi").expect("write");
        fs::write(store.data_dir().join("not-a-uuid.json"), "{}").expect("write");

        let ids = store.sweep().expect("sweep failed");
        assert!(ids.is_empty());
    }
}
