//! Runner configuration
//!
//! Defines all configurable parameters for the execution backends:
//! polling intervals, the submission backoff budget, and the poll timeout
//! guarding against workloads that never reach a terminal state.

use std::time::Duration;

/// Execution backend configuration
///
/// All timeouts and intervals are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, fast vs slow clusters).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Kubernetes namespace workloads are submitted to
    pub namespace: String,

    /// How often the cluster backend polls pod status
    pub poll_interval: Duration,

    /// How often the local backend polls container status
    pub local_poll_interval: Duration,

    /// Maximum number of submission attempts before giving up
    pub submit_max_attempts: u32,

    /// Backoff before the second submission attempt; doubles per attempt
    pub submit_backoff_base: Duration,

    /// Upper bound on how long a run may stay non-terminal;
    /// `None` polls forever
    pub poll_timeout: Option<Duration>,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            poll_interval: Duration::from_secs(5),
            local_poll_interval: Duration::from_secs(1),
            submit_max_attempts: 5,
            submit_backoff_base: Duration::from_secs(1),
            poll_timeout: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - HOIST_NAMESPACE (optional, default: "default")
    /// - HOIST_POLL_INTERVAL (optional, seconds, default: 5)
    /// - HOIST_SUBMIT_MAX_ATTEMPTS (optional, default: 5)
    /// - HOIST_SUBMIT_BACKOFF_BASE (optional, seconds, default: 1)
    /// - HOIST_POLL_TIMEOUT (optional, seconds, 0 disables the bound,
    ///   default: 86400)
    pub fn from_env() -> Self {
        let namespace =
            std::env::var("HOIST_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        let poll_interval = std::env::var("HOIST_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        let submit_max_attempts = std::env::var("HOIST_SUBMIT_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(5);

        let submit_backoff_base = std::env::var("HOIST_SUBMIT_BACKOFF_BASE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(1));

        let poll_timeout = match std::env::var("HOIST_POLL_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(24 * 60 * 60)),
        };

        Self {
            namespace,
            poll_interval,
            local_poll_interval: Duration::from_secs(1),
            submit_max_attempts,
            submit_backoff_base,
            poll_timeout,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.namespace.is_empty() {
            return Err("namespace cannot be empty".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }

        if self.local_poll_interval.is_zero() {
            return Err("local_poll_interval must be greater than 0".to_string());
        }

        if self.submit_max_attempts == 0 {
            return Err("submit_max_attempts must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
