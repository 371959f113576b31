//! Resource limits applied to playground containers.

/// Fixed isolation/resource policy for playground containers.
///
/// This is deployment configuration, not a per-request knob: every sandbox
/// the provisioner creates runs under the same limits.
///
/// # Example
///
/// ```
/// use playground_sessions::sandbox::ResourcePolicy;
///
/// let policy = ResourcePolicy::default()
///     .with_memory("256m")
///     .with_cpus(0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePolicy {
    /// Memory limit in engine syntax (e.g. "512m").
    pub memory: String,

    /// CPU quota in whole or fractional CPUs.
    pub cpus: f64,

    /// Maximum number of processes inside the container.
    pub pids_limit: u32,

    /// Per-process file descriptor limit (applied as soft and hard).
    pub nofile: u32,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            memory: String::from("512m"),
            cpus: 1.0,
            pids_limit: 256,
            nofile: 1024,
        }
    }
}

impl ResourcePolicy {
    /// Creates a policy with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    /// Sets the CPU quota.
    #[must_use]
    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = cpus;
        self
    }

    /// Sets the process limit.
    #[must_use]
    pub fn with_pids_limit(mut self, pids_limit: u32) -> Self {
        self.pids_limit = pids_limit;
        self
    }

    /// Sets the file descriptor limit.
    #[must_use]
    pub fn with_nofile(mut self, nofile: u32) -> Self {
        self.nofile = nofile;
        self
    }

    /// Renders the policy as container engine CLI arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        vec![
            String::from("--memory"),
            self.memory.clone(),
            String::from("--cpus"),
            self.cpus.to_string(),
            String::from("--pids-limit"),
            self.pids_limit.to_string(),
            String::from("--ulimit"),
            format!("nofile={0}:{0}", self.nofile),
        ]
    }
}
