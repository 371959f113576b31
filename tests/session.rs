//! Integration tests for the playground session lifecycle.
//!
//! These tests verify:
//! - Provisioning, status, execute, extend, and stop contracts
//! - The 4-hour lifetime cap at creation and on extension
//! - Lazy expiry discovery and its cascade to teardown
//! - Idempotent cleanup and stale-timer safety
//! - Not-found opacity for unknown vs. expired ids
//!
//! Everything runs against an in-memory fake engine; no docker daemon is
//! required.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use playground_sessions::error::{RuntimeError, SessionError};
use playground_sessions::sandbox::{ContainerRuntime, ExecOutput, ResourcePolicy};
use playground_sessions::session::{
    CLEANUP_BUFFER, MAX_DURATION, STORAGE_TTL, SessionConfig, SessionManager, SessionRecord,
    SessionStatus,
};

/// In-memory engine: containers are entries in a set, exec is scripted.
#[derive(Clone, Default)]
struct FakeEngine {
    state: Arc<EngineState>,
}

#[derive(Default)]
struct EngineState {
    running: Mutex<HashSet<String>>,
    stops: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn is_up(&self, name: &str) -> bool {
        self.state.running.lock().unwrap().contains(name)
    }

    fn kill_out_of_band(&self, name: &str) {
        self.state.running.lock().unwrap().remove(name);
    }

    fn stop_count(&self, name: &str) -> usize {
        self.state
            .stops
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }
}

impl ContainerRuntime for FakeEngine {
    fn image_exists(&self, _image: &str) -> Result<bool, RuntimeError> {
        Ok(true)
    }

    fn pull_image(&self, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn create(
        &self,
        name: &str,
        _image: &str,
        _policy: &ResourcePolicy,
    ) -> Result<(), RuntimeError> {
        let mut running = self.state.running.lock().unwrap();
        if !running.insert(name.to_string()) {
            return Err(RuntimeError::CommandFailed {
                context: format!("create container {name}: name already in use"),
            });
        }
        Ok(())
    }

    fn exec(&self, name: &str, command: &str) -> Result<ExecOutput, RuntimeError> {
        if !self.state.running.lock().unwrap().contains(name) {
            return Err(RuntimeError::CommandFailed {
                context: format!("exec in container {name}: no such container"),
            });
        }

        // A long-running command is cut off at the timeout with partial output.
        if command.contains("sleep") {
            return Ok(ExecOutput {
                stdout: String::from("partial output before the timeout\n"),
                stderr: String::new(),
                exit_code: 137,
                timed_out: true,
            });
        }

        Ok(ExecOutput {
            stdout: format!("ran: {command}\n"),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
        })
    }

    fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.running.lock().unwrap().contains(name))
    }

    fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.state.stops.lock().unwrap().push(name.to_string());
        self.state.running.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Helper to build a manager over a fresh fake engine and temp store.
fn test_manager() -> (SessionManager, FakeEngine, tempfile::TempDir) {
    let engine = FakeEngine::default();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SessionConfig::default().with_data_dir(dir.path());
    let manager = SessionManager::new(Box::new(engine.clone()), config).expect("manager");
    (manager, engine, dir)
}

/// Stores an already-expired record with a container still "running".
fn plant_expired_session(manager: &SessionManager, engine: &FakeEngine) -> uuid::Uuid {
    let mut record = SessionRecord::new(
        Uuid::new_v4(),
        "u-1",
        "alice",
        Duration::from_secs(3600),
    );
    record.expires_at = Utc::now() - chrono::Duration::minutes(5);
    manager.store().put(&record, STORAGE_TTL).expect("put");
    engine
        .state
        .running
        .lock()
        .unwrap()
        .insert(record.id.to_string());
    record.id
}

// =============================================================================
// Provisioning
// =============================================================================

#[test]
fn test_start_one_hour_session_reports_running() {
    let (manager, engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");

    assert_eq!(session.record.lifetime(), chrono::Duration::seconds(3600));
    assert!(engine.is_up(&session.record.id.to_string()));
    assert!(session.bootstrap.fully_provisioned());

    let view = manager.status(session.record.id).expect("status failed");
    assert_eq!(view.status, SessionStatus::Running);
    assert!(view.time_remaining > Duration::from_secs(3590));
    assert!(view.time_remaining <= Duration::from_secs(3600));
}

#[test]
fn test_credential_is_shown_once_and_never_stored() {
    let (manager, _engine, dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    assert!(!session.credential_secret.is_empty());

    // Nothing on disk contains the secret.
    for entry in std::fs::read_dir(dir.path()).expect("read_dir") {
        let path = entry.expect("entry").path();
        if path.is_file() {
            let content = std::fs::read_to_string(&path).expect("read");
            assert!(
                !content.contains(&session.credential_secret),
                "secret leaked into {}",
                path.display()
            );
        }
    }
}

#[test]
fn test_sessions_get_distinct_containers() {
    let (manager, engine, _dir) = test_manager();

    let a = manager.start("u-1", "alice", 3600).expect("start a");
    let b = manager.start("u-2", "bob", 3600).expect("start b");

    assert_ne!(a.record.id, b.record.id);
    assert!(engine.is_up(&a.record.id.to_string()));
    assert!(engine.is_up(&b.record.id.to_string()));
}

// =============================================================================
// Extension and the lifetime cap
// =============================================================================

#[test]
fn test_extend_past_cap_is_rejected_without_state_change() {
    let (manager, _engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");

    // 1h + 4h = 5h > 4h cap.
    let result = manager.extend(session.record.id, 4);
    assert!(matches!(result, Err(SessionError::CapExceeded { .. })));

    let stored = manager
        .store()
        .get(session.record.id)
        .expect("get")
        .expect("record");
    assert_eq!(stored.expires_at, session.record.expires_at);
}

#[test]
fn test_extend_one_hour_is_accepted() {
    let (manager, _engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let outcome = manager.extend(session.record.id, 1).expect("extend failed");

    assert_eq!(
        outcome.expires_at - session.record.created_at,
        chrono::Duration::seconds(7200)
    );
    assert!(outcome.expires_at > session.record.expires_at);
}

#[test]
fn test_lifetime_cap_holds_after_every_accepted_extension() {
    let (manager, _engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let id = session.record.id;

    let mut last_expiry = session.record.expires_at;
    for hours in [1, 1, 1] {
        let outcome = manager.extend(id, hours).expect("extend failed");
        assert!(outcome.expires_at > last_expiry, "expiry must be monotonic");
        last_expiry = outcome.expires_at;
    }

    // Now at exactly the cap; one more hour must be rejected.
    let stored = manager.store().get(id).expect("get").expect("record");
    assert_eq!(
        stored.lifetime().to_std().expect("positive"),
        MAX_DURATION
    );
    assert!(matches!(
        manager.extend(id, 1),
        Err(SessionError::CapExceeded { .. })
    ));
}

// =============================================================================
// Command execution
// =============================================================================

#[test]
fn test_execute_returns_combined_output() {
    let (manager, _engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let result = manager
        .execute(session.record.id, "uname -a")
        .expect("execute failed");

    assert_eq!(result.output, "ran: uname -a");
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
}

#[test]
fn test_timed_out_command_is_distinguishable_with_partial_output() {
    let (manager, _engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let result = manager
        .execute(session.record.id, "sleep 600")
        .expect("execute failed");

    assert!(result.timed_out);
    assert_eq!(result.exit_code, 137);
    assert_eq!(result.output, "partial output before the timeout");
}

// =============================================================================
// Expiry discovery
// =============================================================================

#[test]
fn test_expired_session_is_gone_for_every_operation() {
    let (manager, engine, _dir) = test_manager();
    let id = plant_expired_session(&manager, &engine);

    // Status discovers the expiry and tears the session down.
    assert!(matches!(manager.status(id), Err(SessionError::NotFound)));
    assert!(!engine.is_up(&id.to_string()));
    assert!(manager.store().get(id).expect("get").is_none());

    // Every later operation answers the same way.
    assert!(matches!(
        manager.execute(id, "echo hi"),
        Err(SessionError::NotFound)
    ));
    assert!(matches!(manager.extend(id, 1), Err(SessionError::NotFound)));
    assert!(matches!(manager.stop(id), Err(SessionError::NotFound)));
}

#[test]
fn test_unknown_and_expired_ids_are_indistinguishable() {
    let (manager, engine, _dir) = test_manager();

    let never_issued = manager
        .status(Uuid::new_v4())
        .expect_err("unknown id should fail");

    let id = plant_expired_session(&manager, &engine);
    let expired = manager.status(id).expect_err("expired id should fail");

    assert_eq!(never_issued.to_string(), expired.to_string());
}

#[test]
fn test_dead_container_is_reported_stopped_then_gone() {
    let (manager, engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let id = session.record.id;

    engine.kill_out_of_band(&id.to_string());

    let view = manager.status(id).expect("status failed");
    assert_eq!(view.status, SessionStatus::Stopped);
    assert_eq!(view.time_remaining, Duration::ZERO);

    assert!(matches!(manager.status(id), Err(SessionError::NotFound)));
}

// =============================================================================
// Stop and cleanup
// =============================================================================

#[test]
fn test_stop_twice_second_is_not_found() {
    let (manager, engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let id = session.record.id;

    manager.stop(id).expect("first stop failed");
    assert!(!engine.is_up(&id.to_string()));

    assert!(matches!(manager.stop(id), Err(SessionError::NotFound)));
}

#[test]
fn test_reap_twice_reaches_the_same_end_state() {
    let (manager, engine, _dir) = test_manager();
    let id = plant_expired_session(&manager, &engine);

    manager.reap(id);
    let stops_after_first = engine.stop_count(&id.to_string());
    assert!(manager.store().get(id).expect("get").is_none());

    // Second firing: session absent, no error, container still gone.
    manager.reap(id);
    assert!(manager.store().get(id).expect("get").is_none());
    assert!(engine.stop_count(&id.to_string()) >= stops_after_first);
    assert!(!engine.is_up(&id.to_string()));
}

#[test]
fn test_stale_cleanup_timer_spares_extended_session() {
    let (manager, engine, _dir) = test_manager();

    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    let id = session.record.id;
    manager.extend(id, 1).expect("extend failed");

    // A timer armed before the extension fires now, early: it must
    // re-validate and leave the extended session alone.
    manager.arm_cleanup(id, Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(200));

    assert!(engine.is_up(&id.to_string()));
    let stored = manager.store().get(id).expect("get").expect("record");
    assert_eq!(stored.lifetime(), chrono::Duration::seconds(7200));
}

#[test]
fn test_recover_rearms_sessions_across_restart() {
    let engine = FakeEngine::default();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SessionConfig::default().with_data_dir(dir.path());

    // First process lifetime: a session is started, then the process "dies".
    let manager = SessionManager::new(Box::new(engine.clone()), config.clone()).expect("manager");
    let session = manager.start("u-1", "alice", 3600).expect("start failed");
    drop(manager);

    // Second process lifetime over the same store.
    let manager = SessionManager::new(Box::new(engine.clone()), config).expect("manager");
    let recovered = manager.recover().expect("recover failed");
    assert_eq!(recovered, 1);

    // The session itself is still live and serviceable.
    let view = manager.status(session.record.id).expect("status failed");
    assert_eq!(view.status, SessionStatus::Running);
}

// =============================================================================
// Policy constants
// =============================================================================

#[test]
fn test_storage_ttl_dominates_cap_plus_buffer() {
    assert!(STORAGE_TTL > MAX_DURATION + CLEANUP_BUFFER);
}
