//! Delayed teardown timers.
//!
//! Each arm call spawns one detached fire-once timer thread. There is no
//! cancellation primitive: extending a session arms a fresh timer for the
//! new deadline and simply leaves the earlier ones running. That is safe
//! because every firing goes through [`SessionManager::reap`], which
//! re-checks the record's `expires_at` before acting. A stale timer from
//! before an extension finds the session still valid and leaves it alone.
//!
//! Firing is at-least-once and reap is idempotent, so a timer racing an
//! explicit stop or a lazy expiry discovery is harmless too.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, trace};

use super::SessionId;
use super::lifecycle::SessionManager;

/// Arms a fire-once cleanup timer for the session.
pub(crate) fn arm(manager: SessionManager, id: SessionId, fire_after: Duration) {
    trace!(%id, fire_after_secs = fire_after.as_secs(), "arming cleanup timer");

    let spawned = thread::Builder::new()
        .name(format!("cleanup-{id}"))
        .spawn(move || {
            thread::sleep(fire_after);
            debug!(%id, "cleanup timer fired");
            manager.reap(id);
        });

    if let Err(e) = spawned {
        // The session would rely solely on lazy expiry discovery.
        error!(%id, error = %e, "failed to spawn cleanup timer thread");
    }
}
