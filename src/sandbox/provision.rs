//! In-sandbox bootstrap: package repositories, trust store, root credential.
//!
//! Every step is best-effort. A playground without working package
//! installation is still usable for shell work, so a failed step degrades
//! the session instead of failing provisioning; the caller gets the
//! per-step outcome and surfaces it.
//!
//! # Trust-store bootstrap
//!
//! A fresh image has no trust store, so the packages that provide one cannot
//! be fetched with verification enabled. The first update/install therefore
//! runs with `--allow-untrusted`, strictly limited to the trust packages
//! from the configured mirrors, and is immediately followed by a plain
//! update that re-establishes verification. Verification is never disabled
//! for any later operation.

use tracing::{debug, warn};

use super::runtime::ContainerRuntime;

/// Package mirrors written into the sandbox before the first update.
const APK_MIRRORS: [&str; 2] = [
    "https://dl-cdn.alpinelinux.org/alpine/v3.20/main",
    "https://dl-cdn.alpinelinux.org/alpine/v3.20/community",
];

/// Outcome of the provisioning bootstrap sequence.
///
/// `credential_injected == false` means the issued secret will not
/// authenticate inside the sandbox. That degraded mode is reported to the
/// caller, not masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Package repository list was written.
    pub repositories_configured: bool,
    /// Trust store was installed and verification re-enabled.
    pub trust_store_ready: bool,
    /// Root credential was set inside the sandbox.
    pub credential_injected: bool,
}

impl BootstrapReport {
    /// Returns true when every bootstrap step succeeded.
    #[must_use]
    pub fn fully_provisioned(&self) -> bool {
        self.repositories_configured && self.trust_store_ready && self.credential_injected
    }

    /// Human-readable degraded-mode warnings, one per failed step.
    #[must_use]
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if !self.repositories_configured {
            warnings.push("package repositories were not configured; package installs may fail");
        }
        if !self.trust_store_ready {
            warnings.push("trust store bootstrap failed; package verification is unavailable");
        }
        if !self.credential_injected {
            warnings.push("credential injection failed; the issued secret will not authenticate");
        }
        warnings
    }
}

/// Runs the ordered bootstrap sequence inside a freshly created container.
pub fn bootstrap(runtime: &dyn ContainerRuntime, name: &str, credential: &str) -> BootstrapReport {
    let repositories_configured = run_step(
        runtime,
        name,
        "configure package repositories",
        &repositories_command(),
    );
    let trust_store_ready = run_step(
        runtime,
        name,
        "bootstrap trust store",
        &trust_store_command(),
    );
    let credential_injected = run_step(
        runtime,
        name,
        "inject root credential",
        &credential_command(credential),
    );

    BootstrapReport {
        repositories_configured,
        trust_store_ready,
        credential_injected,
    }
}

/// Runs one bootstrap command, reporting success without failing the caller.
fn run_step(runtime: &dyn ContainerRuntime, name: &str, step: &str, command: &str) -> bool {
    match runtime.exec(name, command) {
        Ok(output) if output.success() => {
            debug!(container = name, step, "bootstrap step complete");
            true
        }
        Ok(output) => {
            warn!(
                container = name,
                step,
                exit_code = output.exit_code,
                timed_out = output.timed_out,
                stderr = %output.stderr.trim(),
                "bootstrap step failed"
            );
            false
        }
        Err(e) => {
            warn!(container = name, step, error = %e, "bootstrap step failed");
            false
        }
    }
}

fn repositories_command() -> String {
    let quoted: Vec<String> = APK_MIRRORS.iter().map(|m| format!("'{m}'")).collect();
    format!(
        "printf '%s\\n' {} > /etc/apk/repositories",
        quoted.join(" ")
    )
}

fn trust_store_command() -> String {
    String::from(
        "apk update --allow-untrusted && apk add --allow-untrusted ca-certificates && apk update",
    )
}

fn credential_command(credential: &str) -> String {
    // The credential is alphanumeric by construction, so single quoting is safe.
    format!("echo 'root:{credential}' | chpasswd")
}
