//! Configuration for the coordinator.
//!
//! Provides [`CoordinatorConfig`] for tuning tool-iteration defaults, the
//! rate-limit retry schedule, and the shared HTTP pool. Users construct this
//! manually — no file-parsing dependency is introduced.
//!
//! # Example
//!
//! ```rust
//! use llm_coordinator::cloudllm::config::CoordinatorConfig;
//!
//! let config = CoordinatorConfig::default();
//! assert_eq!(config.default_max_tool_iterations, 10);
//! ```

use std::time::Duration;

/// Global configuration for the coordinator.
///
/// Intentionally minimal; callers construct it however they want. No TOML,
/// YAML, or other config-file parsing dependencies are introduced. Any
/// field here is overridden per-call by [`crate::cloudllm::model::Settings`]
/// when present.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Default cap on tool-use loop iterations when `settings.maxToolIterations`
    /// is absent from the call spec.
    pub default_max_tool_iterations: u32,
    /// Default rate-limit retry schedule (milliseconds) when the call spec
    /// supplies none.
    pub default_rate_limit_retry_delays: Vec<u64>,
    /// Idle-connection timeout for the shared HTTP client pool.
    pub pool_idle_timeout: Duration,
    /// Max idle connections per host in the shared pool.
    pub pool_max_idle_per_host: usize,
    /// TCP keepalive interval for the shared pool.
    pub tcp_keepalive: Duration,
    /// Overall request timeout.
    pub request_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    /// Mirrors the pool tuning already proven out for HTTP-backed provider
    /// clients: 90s idle timeout, 10 idle connections per host, 60s
    /// keepalive, a 300s request timeout, and a 30s connect timeout.
    fn default() -> Self {
        Self {
            default_max_tool_iterations: 10,
            default_rate_limit_retry_delays: vec![1000, 2000, 4000],
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            tcp_keepalive: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}
