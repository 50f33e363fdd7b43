//! Reactor configuration
//!
//! Compile-time defaults with runtime environment overrides. The value is
//! passed explicitly into every group and loop; nothing reads it globally.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults` module)
//!
//! ```rust,ignore
//! use nioloop_core::ReactorConfig;
//!
//! let config = ReactorConfig::from_env()
//!     .core_count(2)
//!     .poll_timeout(Duration::from_millis(10));
//! config.validate()?;
//! ```

use std::time::Duration;

use crate::env::{env_get, env_get_ms};
use crate::error::{NioError, Result};

/// Library defaults.
pub mod defaults {
    use std::time::Duration;

    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
    pub const EVENT_QUEUE_BOUND: usize = 4096;
    pub const POLL_TIMEOUT: Duration = Duration::from_millis(16);
    pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
    pub const RETRY_BUDGET: u32 = 5;
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
    pub const SELECTOR_REBUILD_THRESHOLD: u32 = 512;
    pub const WORKER_QUEUE_DEPTH: usize = 16 * 1024;
    pub const MAX_CORES: usize = 64;

    pub fn parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Configuration for a reactor group and its loops.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of event loops (one thread each).
    pub core_count: usize,
    /// Size of each loop's scratch read buffer.
    pub read_buffer_size: usize,
    /// Max queued events per loop before `submit` rejects.
    pub event_queue_bound: usize,
    /// Upper bound on one blocking poll.
    pub poll_timeout: Duration,
    /// Sessions idle longer than this are evicted.
    pub liveness_timeout: Duration,
    /// Outbound handshakes still unfinished after this are evicted.
    pub connect_timeout: Duration,
    /// How often the primary loop schedules a liveness sweep.
    pub maintenance_interval: Duration,
    /// Zero-timeout polls granted while positive events remain.
    pub retry_budget: u32,
    /// Largest accepted payload length.
    pub max_frame_len: usize,
    /// Consecutive premature wakeups before the selector is rebuilt.
    /// Zero disables the rebuild.
    pub selector_rebuild_threshold: u32,
    /// Worker pool threads.
    pub worker_threads: usize,
    /// Worker pool pending-task capacity.
    pub worker_queue_depth: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Library defaults only, no environment lookups.
    pub fn new() -> Self {
        let cpus = defaults::parallelism();
        Self {
            core_count: cpus.min(defaults::MAX_CORES),
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            event_queue_bound: defaults::EVENT_QUEUE_BOUND,
            poll_timeout: defaults::POLL_TIMEOUT,
            liveness_timeout: defaults::LIVENESS_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            maintenance_interval: defaults::MAINTENANCE_INTERVAL,
            retry_budget: defaults::RETRY_BUDGET,
            max_frame_len: defaults::MAX_FRAME_LEN,
            selector_rebuild_threshold: defaults::SELECTOR_REBUILD_THRESHOLD,
            worker_threads: cpus,
            worker_queue_depth: defaults::WORKER_QUEUE_DEPTH,
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `NIO_CORE_COUNT`
    /// - `NIO_READ_BUFFER_SIZE`
    /// - `NIO_EVENT_QUEUE_BOUND`
    /// - `NIO_POLL_TIMEOUT_MS`
    /// - `NIO_LIVENESS_TIMEOUT_MS`
    /// - `NIO_CONNECT_TIMEOUT_MS`
    /// - `NIO_MAINTENANCE_INTERVAL_MS`
    /// - `NIO_RETRY_BUDGET`
    /// - `NIO_MAX_FRAME_LEN`
    /// - `NIO_SELECTOR_REBUILD_THRESHOLD`
    /// - `NIO_WORKER_THREADS`
    /// - `NIO_WORKER_QUEUE_DEPTH`
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            core_count: env_get("NIO_CORE_COUNT", base.core_count),
            read_buffer_size: env_get("NIO_READ_BUFFER_SIZE", base.read_buffer_size),
            event_queue_bound: env_get("NIO_EVENT_QUEUE_BOUND", base.event_queue_bound),
            poll_timeout: env_get_ms("NIO_POLL_TIMEOUT_MS", base.poll_timeout),
            liveness_timeout: env_get_ms("NIO_LIVENESS_TIMEOUT_MS", base.liveness_timeout),
            connect_timeout: env_get_ms("NIO_CONNECT_TIMEOUT_MS", base.connect_timeout),
            maintenance_interval: env_get_ms(
                "NIO_MAINTENANCE_INTERVAL_MS",
                base.maintenance_interval,
            ),
            retry_budget: env_get("NIO_RETRY_BUDGET", base.retry_budget),
            max_frame_len: env_get("NIO_MAX_FRAME_LEN", base.max_frame_len),
            selector_rebuild_threshold: env_get(
                "NIO_SELECTOR_REBUILD_THRESHOLD",
                base.selector_rebuild_threshold,
            ),
            worker_threads: env_get("NIO_WORKER_THREADS", base.worker_threads),
            worker_queue_depth: env_get("NIO_WORKER_QUEUE_DEPTH", base.worker_queue_depth),
        }
    }

    pub fn core_count(mut self, n: usize) -> Self {
        self.core_count = n.min(defaults::MAX_CORES);
        self
    }

    pub fn read_buffer_size(mut self, n: usize) -> Self {
        self.read_buffer_size = n;
        self
    }

    pub fn event_queue_bound(mut self, n: usize) -> Self {
        self.event_queue_bound = n;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn liveness_timeout(mut self, d: Duration) -> Self {
        self.liveness_timeout = d;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn maintenance_interval(mut self, d: Duration) -> Self {
        self.maintenance_interval = d;
        self
    }

    pub fn retry_budget(mut self, n: u32) -> Self {
        self.retry_budget = n;
        self
    }

    pub fn max_frame_len(mut self, n: usize) -> Self {
        self.max_frame_len = n;
        self
    }

    pub fn selector_rebuild_threshold(mut self, n: u32) -> Self {
        self.selector_rebuild_threshold = n;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn worker_queue_depth(mut self, n: usize) -> Self {
        self.worker_queue_depth = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 {
            return Err(NioError::Config("core_count must be at least 1"));
        }
        if self.core_count > defaults::MAX_CORES {
            return Err(NioError::Config("core_count exceeds maximum"));
        }
        if self.read_buffer_size == 0 {
            return Err(NioError::Config("read_buffer_size must be non-zero"));
        }
        if self.event_queue_bound == 0 {
            return Err(NioError::Config("event_queue_bound must be at least 1"));
        }
        if self.poll_timeout.is_zero() {
            return Err(NioError::Config("poll_timeout must be non-zero"));
        }
        if self.liveness_timeout.is_zero() {
            return Err(NioError::Config("liveness_timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(NioError::Config("connect_timeout must be non-zero"));
        }
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(NioError::Config("max_frame_len must fit in a u32 length field"));
        }
        if self.worker_threads == 0 {
            return Err(NioError::Config("worker_threads must be at least 1"));
        }
        if self.worker_queue_depth == 0 {
            return Err(NioError::Config("worker_queue_depth must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ReactorConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_budget, defaults::RETRY_BUDGET);
        assert_eq!(config.poll_timeout, Duration::from_millis(16));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ReactorConfig::new()
            .core_count(1000)
            .event_queue_bound(8)
            .liveness_timeout(Duration::from_millis(50));
        assert_eq!(config.core_count, defaults::MAX_CORES);
        assert_eq!(config.event_queue_bound, 8);
        assert_eq!(config.liveness_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ReactorConfig::new().core_count(0).validate().is_err());
        assert!(ReactorConfig::new().event_queue_bound(0).validate().is_err());
        assert!(ReactorConfig::new().poll_timeout(Duration::ZERO).validate().is_err());
        assert!(ReactorConfig::new().worker_threads(0).validate().is_err());
        assert!(ReactorConfig::new().max_frame_len(0).validate().is_err());
        assert!(ReactorConfig::new().connect_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("NIO_EVENT_QUEUE_BOUND", "77");
        std::env::set_var("NIO_POLL_TIMEOUT_MS", "5");
        let config = ReactorConfig::from_env();
        assert_eq!(config.event_queue_bound, 77);
        assert_eq!(config.poll_timeout, Duration::from_millis(5));
        std::env::remove_var("NIO_EVENT_QUEUE_BOUND");
        std::env::remove_var("NIO_POLL_TIMEOUT_MS");
    }
}
