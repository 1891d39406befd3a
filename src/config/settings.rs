use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modbus::DEFAULT_UNIT_ID;
use crate::utils::error::ModbusError;

pub const DEFAULT_HOST: &str = "192.168.1.99";
pub const DEFAULT_PORT: u16 = 502;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub polling: PollingConfig,
    pub output: OutputConfig,
}

/// Where the controller lives. Read once at the start of every poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub timeout_ms: u64,
    pub request_delay_ms: u64,
    pub update_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_format: String,
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            request_delay_ms: 50,
            update_interval_seconds: 10,
        }
    }
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: "console".to_string(),
        }
    }
}

impl Config {
    /// Config file (if `--config` was given) overridden by command line flags.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, ModbusError> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(host) = matches.get_one::<String>("host") {
            config.connection.host = host.clone();
        }
        if let Some(port) = matches.get_one::<String>("port") {
            config.connection.port = port
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid port: {}", port)))?;
        }
        if let Some(interval) = matches.get_one::<String>("interval") {
            config.polling.update_interval_seconds = interval
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid interval: {}", interval)))?;
        }
        if let Some(format) = matches.get_one::<String>("format") {
            config.output.default_format = format.clone();
        }

        config.validate()?;
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let path = path.as_ref();
        info!("📄 Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ModbusError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ModbusError> {
        toml::to_string_pretty(self).map_err(|e| ModbusError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ModbusError> {
        if self.connection.host.trim().is_empty() {
            return Err(ModbusError::ConfigError("Host must not be empty".to_string()));
        }
        if self.connection.port == 0 {
            return Err(ModbusError::ConfigError("Port must be between 1 and 65535".to_string()));
        }
        if self.polling.timeout_ms == 0 {
            return Err(ModbusError::ConfigError("timeout_ms must be positive".to_string()));
        }
        if self.polling.update_interval_seconds == 0 {
            return Err(ModbusError::ConfigError(
                "update_interval_seconds must be positive".to_string(),
            ));
        }
        match self.output.default_format.as_str() {
            "console" | "json" => Ok(()),
            other => Err(ModbusError::ConfigError(format!("Unknown output format: {}", other))),
        }
    }
}
