//! Configuration file.
//!
//! A JSON object mapping protocol names to their settings:
//!
//! ```json
//! {
//!   "L2TP":  { "port": 1701, "protocol_version": 2, "host_name": "lns1" },
//!   "IPsec": { "port": 500 }
//! }
//! ```
//!
//! Only `port` is required; everything else has a default.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;
use crate::core::constants::{
    DEFAULT_MAX_TUNNELS, DEFAULT_RECEIVE_WINDOW, HELLO_INTERVAL, IDLE_TIMEOUT, MAX_RETRANSMITS,
    PROTOCOL_VERSION, VERSION_MASK,
};
use crate::tunnel::DispatcherConfig;

/// Key of the L2TP entry.
pub const L2TP_PROTOCOL: &str = "L2TP";

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileConfig {
    protocols: BTreeMap<String, ProtocolConfig>,
}

impl FileConfig {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        for protocol in config.protocols.values() {
            protocol.validate()?;
        }
        Ok(config)
    }

    /// Settings for `name`.
    pub fn protocol(&self, name: &str) -> Result<&ProtocolConfig, ConfigError> {
        self.protocols
            .get(name)
            .ok_or_else(|| ConfigError::MissingProtocol(name.to_string()))
    }

    /// Every configured protocol, by name.
    pub fn protocols(&self) -> impl Iterator<Item = (&str, &ProtocolConfig)> {
        self.protocols
            .iter()
            .map(|(name, config)| (name.as_str(), config))
    }
}

/// Settings of one protocol listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// UDP port.
    pub port: u16,

    /// Header version nibble.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    /// Address to bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Host Name to advertise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,

    /// Vendor Name to advertise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,

    /// Receive Window Size to advertise.
    #[serde(default = "default_receive_window_size")]
    pub receive_window_size: u16,

    /// Seconds of silence before a HELLO.
    #[serde(default = "default_hello_interval_secs")]
    pub hello_interval_secs: u64,

    /// Seconds of silence before the tunnel is stopped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Retransmissions before a tunnel is dropped.
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,

    /// Maximum number of tunnels.
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: usize,
}

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_receive_window_size() -> u16 {
    DEFAULT_RECEIVE_WINDOW
}

fn default_hello_interval_secs() -> u64 {
    HELLO_INTERVAL.as_secs()
}

fn default_idle_timeout_secs() -> u64 {
    IDLE_TIMEOUT.as_secs()
}

fn default_max_retransmits() -> u32 {
    MAX_RETRANSMITS
}

fn default_max_tunnels() -> usize {
    DEFAULT_MAX_TUNNELS
}

impl ProtocolConfig {
    /// Settings with defaults for everything but the port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            protocol_version: default_protocol_version(),
            bind_address: default_bind_address(),
            host_name: None,
            vendor_name: None,
            receive_window_size: default_receive_window_size(),
            hello_interval_secs: default_hello_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_retransmits: default_max_retransmits(),
            max_tunnels: default_max_tunnels(),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version == 0 || self.protocol_version > VERSION_MASK {
            return Err(ConfigError::InvalidValue {
                field: "protocol_version",
                reason: format!("{} does not fit the 4-bit version field", self.protocol_version),
            });
        }
        if self.receive_window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "receive_window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.hello_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hello_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.idle_timeout_secs <= self.hello_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "idle_timeout_secs",
                reason: format!(
                    "must be longer than hello_interval_secs ({})",
                    self.hello_interval_secs
                ),
            });
        }
        if self.max_tunnels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tunnels",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Protocol behaviour for the dispatcher.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig {
            protocol_version: self.protocol_version,
            receive_window_size: self.receive_window_size,
            hello_interval: Duration::from_secs(self.hello_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_tunnels: self.max_tunnels,
            ..DispatcherConfig::default()
        };
        config.retransmit.max_retransmits = self.max_retransmits;
        if let Some(host_name) = &self.host_name {
            config.host_name = host_name.clone();
        }
        if let Some(vendor_name) = &self.vendor_name {
            config.vendor_name = vendor_name.clone();
        }
        config
    }

    /// Full server configuration.
    #[cfg(feature = "server")]
    pub fn to_server_config(&self) -> crate::server::ServerConfig {
        crate::server::ServerConfig {
            bind_addr: self.bind_addr(),
            dispatcher: self.to_dispatcher_config(),
            ..crate::server::ServerConfig::default()
        }
    }
}
