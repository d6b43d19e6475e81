//! Session Configuration
//!
//! Fixed virtual-interface parameters, the local proxy endpoint handed to
//! the forwarding engine, per-call timeouts, and the routing profile that
//! is passed through to the engine untouched.
//!
//! Configuration can be embedded (`Default`) or loaded from TOML/JSON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Virtual interface parameters
///
/// IPv4 only: every address field is an `Ipv4Addr`, so a second address
/// family cannot be configured by accident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Session name shown by the OS
    pub session_name: String,
    /// Point-to-point address of the interface
    pub address: Ipv4Addr,
    /// Prefix length of `address`
    pub prefix_len: u8,
    /// Route captured by the interface (default route)
    pub route: Ipv4Addr,
    /// Prefix length of `route`
    pub route_prefix: u8,
    /// Single DNS resolver
    pub dns: Ipv4Addr,
    /// Interface MTU
    pub mtu: u16,
    /// Open the descriptor in blocking mode
    pub blocking: bool,
    /// Let other apps bypass the tunnel if they ask to
    pub allow_bypass: bool,
    /// Exclude the host application from its own tunnel
    pub exclude_host: bool,
    /// Additional excluded applications, passed through as-is
    pub excluded_apps: Vec<String>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            session_name: "DefyxVPN".to_string(),
            address: Ipv4Addr::new(10, 0, 0, 2),
            prefix_len: 32,
            route: Ipv4Addr::UNSPECIFIED,
            route_prefix: 0,
            dns: Ipv4Addr::new(1, 1, 1, 1),
            mtu: 1500,
            blocking: true,
            allow_bypass: true,
            exclude_host: true,
            excluded_apps: Vec::new(),
        }
    }
}

impl InterfaceConfig {
    /// Validate interface parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(576..=9000).contains(&self.mtu) {
            return Err(ConfigError::InvalidMtu(self.mtu));
        }
        for prefix in [self.prefix_len, self.route_prefix] {
            if prefix > 32 {
                return Err(ConfigError::InvalidPrefix(prefix));
            }
        }
        Ok(())
    }
}

/// Per-call timeouts, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub provision_ms: u64,
    pub engine_ms: u64,
    pub latency_ms: u64,
    pub flag_ms: u64,
    pub persistence_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            provision_ms: 10_000,
            engine_ms: 10_000,
            latency_ms: 5_000,
            flag_ms: 3_000,
            persistence_ms: 2_000,
        }
    }
}

impl Timeouts {
    pub fn provision(&self) -> Duration {
        Duration::from_millis(self.provision_ms)
    }

    pub fn engine(&self) -> Duration {
        Duration::from_millis(self.engine_ms)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn flag(&self) -> Duration {
        Duration::from_millis(self.flag_ms)
    }

    pub fn persistence(&self) -> Duration {
        Duration::from_millis(self.persistence_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("provision_ms", self.provision_ms),
            ("engine_ms", self.engine_ms),
            ("latency_ms", self.latency_ms),
            ("flag_ms", self.flag_ms),
            ("persistence_ms", self.persistence_ms),
        ];
        match fields.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(ConfigError::ZeroTimeout(*name)),
            None => Ok(()),
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Local proxy endpoint the engine relays through
    pub proxy_endpoint: SocketAddr,
    /// Capacity of the lossy diagnostic buffer (lines)
    pub diagnostics_capacity: usize,
    /// Directory for the persisted session flag
    pub state_dir: PathBuf,
    /// Virtual interface parameters
    pub interface: InterfaceConfig,
    /// Call timeouts
    pub timeouts: Timeouts,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            proxy_endpoint: SocketAddr::from(([127, 0, 0, 1], 5000)),
            diagnostics_capacity: 256,
            state_dir: PathBuf::from("/tmp/defyx"),
            interface: InterfaceConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl ControllerConfig {
    /// Proxy endpoint in the `host:port` form the engine expects
    pub fn proxy_endpoint_string(&self) -> String {
        self.proxy_endpoint.to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.interface.validate()?;
        self.timeouts.validate()?;
        if self.proxy_endpoint.port() == 0 {
            return Err(ConfigError::InvalidProxyEndpoint(self.proxy_endpoint_string()));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Load from a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => ConfigFormat::Toml,
            "json" => ConfigFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_str_as(&content, format)
    }

    /// Load from a string in the given format
    pub fn from_str_as(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Routing/pattern parameters for the engine's routing entry point
///
/// Opaque to the controller: the values are handed to the engine as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingProfile {
    /// Engine cache/working directory
    pub cache_dir: PathBuf,
    /// Routing rule string ("flow line")
    pub flow_line: String,
    /// Pattern/profile identifier
    pub pattern: String,
}

impl RoutingProfile {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        flow_line: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            flow_line: flow_line.into(),
            pattern: pattern.into(),
        }
    }
}

/// Parameters of a single `start()` request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    /// When set, the routing phase runs right after the tunnel attaches
    pub routing: Option<RoutingProfile>,
}

impl StartRequest {
    /// Descriptor handoff only
    pub fn tunnel_only() -> Self {
        Self { routing: None }
    }

    /// Descriptor handoff followed by the routing phase
    pub fn with_routing(profile: RoutingProfile) -> Self {
        Self {
            routing: Some(profile),
        }
    }
}
