use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
pub const DEFAULT_USER_AGENT: &str = concat!("http-scan-rs/", env!("CARGO_PKG_VERSION"));

/// Validated engine configuration, passed by value into the scanner.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of concurrent fetch workers.
    pub workers: usize,
    /// Run deadline measured from the start of the scan.
    pub timeout: Duration,
    /// Capacity of both the job queue and the result queue.
    pub queue_capacity: usize,
    /// How long to keep draining after cancellation before aborting tasks.
    pub shutdown_grace: Duration,
    pub user_agent: String,
}

impl ScanConfig {
    /// Build a config, rejecting a zero worker count or a zero timeout.
    pub fn new(workers: usize, timeout: Duration) -> Result<Self> {
        if workers == 0 {
            bail!("number of workers must be greater than zero");
        }
        if timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        Ok(Self {
            workers,
            timeout,
            queue_capacity: workers,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Re-check invariants; fields are public so callers may have changed them.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("number of workers must be greater than zero");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be greater than zero");
        }
        Ok(())
    }
}

/// Worker count used when none is given: the host's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
