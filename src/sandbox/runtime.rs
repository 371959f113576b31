//! Thin client for the container engine.
//!
//! The engine is an external collaborator reached through its CLI; image
//! distribution, isolation, and security capabilities are its business, not
//! ours. Every operation here is a single synchronous invocation.

use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, instrument, trace};

use super::exec::{self, ExecOutput};
use super::policy::ResourcePolicy;
use crate::error::RuntimeError;

/// Default wall-clock timeout for a single in-sandbox command.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for an in-sandbox command to exit.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Narrow, synchronous interface to the container engine.
///
/// `name` is the session identifier, which doubles as the container name;
/// `create` therefore fails if the name is already in use, and no two
/// sessions can share a container by construction.
pub trait ContainerRuntime: Send + Sync {
    /// Returns true if the image is present locally.
    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pulls the image from its registry.
    fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates and starts a container under the given resource policy.
    fn create(&self, name: &str, image: &str, policy: &ResourcePolicy)
    -> Result<(), RuntimeError>;

    /// Runs a shell command inside a running container, aggregating output
    /// under the client's execution timeout.
    fn exec(&self, name: &str, command: &str) -> Result<ExecOutput, RuntimeError>;

    /// Returns true if the container exists and is running.
    fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Stops and removes the container. Missing containers are a no-op.
    fn stop(&self, name: &str) -> Result<(), RuntimeError>;
}

/// [`ContainerRuntime`] implementation shelling out to the docker CLI.
///
/// # Example
///
/// ```no_run
/// use playground_sessions::sandbox::{ContainerRuntime, DockerRuntime, ResourcePolicy};
///
/// let runtime = DockerRuntime::new();
/// runtime.create("demo", "alpine:3.20", &ResourcePolicy::default()).unwrap();
/// let output = runtime.exec("demo", "echo hello").unwrap();
/// assert_eq!(output.stdout.trim(), "hello");
/// ```
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    exec_timeout: Duration,
    poll_interval: Duration,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: String::from("docker"),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl DockerRuntime {
    /// Creates a client for the `docker` binary with default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the in-sandbox command execution timeout.
    #[must_use]
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Sets the poll interval for command supervision.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Verifies the engine CLI is reachable and returns the server version.
    ///
    /// Run once at startup so a missing or broken engine fails fast instead
    /// of failing the first provisioning request.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if the binary cannot be spawned or the engine
    /// does not respond.
    pub fn preflight(&self) -> Result<String, RuntimeError> {
        let output = self.run_checked(
            &["version", "--format", "{{.Server.Version}}"],
            "engine preflight",
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs one engine invocation to completion.
    fn run(&self, args: &[&str]) -> Result<std::process::Output, RuntimeError> {
        trace!(?args, "running container engine command");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::Spawn {
                binary: self.binary.clone(),
                context: format!("{} {}", self.binary, args.join(" ")),
                source: e,
            })
    }

    /// Like `run`, but a non-zero exit becomes an error carrying the engine's stderr.
    fn run_checked(
        &self,
        args: &[&str],
        context: &str,
    ) -> Result<std::process::Output, RuntimeError> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::CommandFailed {
                context: format!("{context}: {}", stderr.trim()),
            });
        }
        Ok(output)
    }
}

impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self))]
    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = self.run(&["image", "inspect", image])?;
        Ok(output.status.success())
    }

    #[instrument(skip(self))]
    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.run_checked(&["pull", image], &format!("pull {image}"))?;
        debug!(image, "image pulled");
        Ok(())
    }

    #[instrument(skip(self, policy))]
    fn create(
        &self,
        name: &str,
        image: &str,
        policy: &ResourcePolicy,
    ) -> Result<(), RuntimeError> {
        // The container idles on PID 1; commands arrive later via exec.
        let mut args: Vec<String> = vec![
            String::from("run"),
            String::from("-d"),
            String::from("--name"),
            name.to_string(),
        ];
        args.extend(policy.to_args());
        args.push(image.to_string());
        args.extend([String::from("sleep"), String::from("infinity")]);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&arg_refs, &format!("create container {name}"))?;
        debug!(name, image, "container created");
        Ok(())
    }

    // The command is skipped from the span: bootstrap runs credential
    // injection through here and secrets must not reach the logs.
    #[instrument(skip(self, command), fields(timeout_ms = %self.exec_timeout.as_millis()))]
    fn exec(&self, name: &str, command: &str) -> Result<ExecOutput, RuntimeError> {
        let child = Command::new(&self.binary)
            .args(["exec", name, "sh", "-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RuntimeError::Spawn {
                binary: self.binary.clone(),
                context: format!("exec in container {name}"),
                source: e,
            })?;

        exec::supervise(child, self.exec_timeout, self.poll_interval)
    }

    #[instrument(skip(self))]
    fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let output = self.run(&["inspect", "--format", "{{.State.Running}}", name])?;
        if !output.status.success() {
            // Inspect fails when the container is gone; that is "not
            // running", not an infrastructure error.
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    #[instrument(skip(self))]
    fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let output = self.run(&["rm", "-f", name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                trace!(name, "container already gone");
                return Ok(());
            }
            return Err(RuntimeError::CommandFailed {
                context: format!("stop container {name}: {}", stderr.trim()),
            });
        }
        debug!(name, "container stopped");
        Ok(())
    }
}

/// Classifies engine stderr for the idempotent-stop case.
fn is_missing_container(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable in-memory runtime shared by lifecycle and provisioning tests.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{ContainerRuntime, ExecOutput, ResourcePolicy, RuntimeError};

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub image_present: AtomicBool,
        pub fail_pull: AtomicBool,
        pub fail_create: AtomicBool,
        /// Exec commands containing any of these substrings exit non-zero.
        pub failing_steps: Mutex<Vec<String>>,
        pub running: Mutex<HashSet<String>>,
        /// Recorded (container, command) pairs, in order.
        pub execs: Mutex<Vec<(String, String)>>,
        pub stops: Mutex<Vec<String>>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct FakeRuntime {
        pub state: Arc<FakeState>,
    }

    impl FakeRuntime {
        /// A runtime whose base image is already present locally.
        pub(crate) fn with_image() -> Self {
            let rt = Self::default();
            rt.state.image_present.store(true, Ordering::SeqCst);
            rt
        }

        pub(crate) fn failing_step(self, substring: &str) -> Self {
            self.state
                .failing_steps
                .lock()
                .unwrap()
                .push(substring.to_string());
            self
        }

        pub(crate) fn exec_commands(&self) -> Vec<String> {
            self.state
                .execs
                .lock()
                .unwrap()
                .iter()
                .map(|(_, command)| command.clone())
                .collect()
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn image_exists(&self, _image: &str) -> Result<bool, RuntimeError> {
            Ok(self.state.image_present.load(Ordering::SeqCst))
        }

        fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
            if self.state.fail_pull.load(Ordering::SeqCst) {
                return Err(RuntimeError::CommandFailed {
                    context: format!("pull {image}: simulated registry failure"),
                });
            }
            self.state.image_present.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn create(
            &self,
            name: &str,
            _image: &str,
            _policy: &ResourcePolicy,
        ) -> Result<(), RuntimeError> {
            if self.state.fail_create.load(Ordering::SeqCst) {
                return Err(RuntimeError::CommandFailed {
                    context: format!("create container {name}: simulated engine failure"),
                });
            }
            let mut running = self.state.running.lock().unwrap();
            if !running.insert(name.to_string()) {
                return Err(RuntimeError::CommandFailed {
                    context: format!("create container {name}: name already in use"),
                });
            }
            Ok(())
        }

        fn exec(&self, name: &str, command: &str) -> Result<ExecOutput, RuntimeError> {
            self.state
                .execs
                .lock()
                .unwrap()
                .push((name.to_string(), command.to_string()));

            if !self.state.running.lock().unwrap().contains(name) {
                return Err(RuntimeError::CommandFailed {
                    context: format!("exec in container {name}: no such container"),
                });
            }

            let failing = self.state.failing_steps.lock().unwrap();
            if failing.iter().any(|s| command.contains(s.as_str())) {
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: String::from("simulated step failure"),
                    exit_code: 1,
                    timed_out: false,
                });
            }

            Ok(ExecOutput {
                stdout: String::from("ok\n"),
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
}
