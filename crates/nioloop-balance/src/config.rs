//! Facade configuration.

use std::net::SocketAddr;
use std::time::Duration;

use nioloop_core::config::ReactorConfig;
use nioloop_core::env::{env_get_ms, env_get_opt};
use nioloop_core::error::{NioError, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:9000";

#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Address the public acceptor binds.
    pub public_addr: SocketAddr,
    /// Backend addresses, used round robin.
    pub backends: Vec<SocketAddr>,
    /// Public-facing group.
    pub reactor: ReactorConfig,
    /// Backend-facing group.
    pub backend_reactor: ReactorConfig,
}

impl FacadeConfig {
    pub fn new(public_addr: SocketAddr, backends: Vec<SocketAddr>) -> Self {
        Self {
            public_addr,
            backends,
            reactor: ReactorConfig::new(),
            backend_reactor: ReactorConfig::new(),
        }
    }

    /// Defaults with environment overrides.
    ///
    /// - `NIO_FACADE_BIND`: public address, default `0.0.0.0:9000`
    /// - `NIO_FACADE_BACKENDS`: comma separated backend addresses
    /// - `NIO_FACADE_CONNECT_TIMEOUT_MS`: backend handshake limit, default
    ///   `NIO_CONNECT_TIMEOUT_MS`
    ///
    /// Both reactor groups also read the `NIO_*` reactor variables.
    /// Unparsable backend entries are skipped with a warning.
    pub fn from_env() -> Self {
        let public_addr = env_get_opt("NIO_FACADE_BIND").unwrap_or_else(default_bind);
        let backends = std::env::var("NIO_FACADE_BACKENDS")
            .map(|list| parse_backends(&list))
            .unwrap_or_default();
        let backend_reactor = ReactorConfig::from_env();
        let connect_timeout =
            env_get_ms("NIO_FACADE_CONNECT_TIMEOUT_MS", backend_reactor.connect_timeout);
        Self {
            public_addr,
            backends,
            reactor: ReactorConfig::from_env(),
            backend_reactor: backend_reactor.connect_timeout(connect_timeout),
        }
    }

    pub fn reactor(mut self, config: ReactorConfig) -> Self {
        self.reactor = config;
        self
    }

    pub fn backend_reactor(mut self, config: ReactorConfig) -> Self {
        self.backend_reactor = config;
        self
    }

    /// How long a backend connect may take before the client is dropped.
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.backend_reactor.connect_timeout = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(NioError::Config("at least one backend address is required"));
        }
        self.reactor.validate()?;
        self.backend_reactor.validate()
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

/// Parse `host:port` entries separated by commas.
pub fn parse_backends(list: &str) -> Vec<SocketAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                tracing::warn!(entry = s, "ignoring unparsable backend address");
                None
            }
        })
        .collect()
}
