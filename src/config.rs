//! Configuration management for the SNMP simulator

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mib::{DeviceType, ManualValue};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub node_id: String,
    pub description: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_id: "snmpsim-1".to_string(),
            description: "High-scale SNMP device simulator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Sockets bound per UDP port via SO_REUSEPORT.
    pub socket_count: usize,
    pub buffer_bytes: usize,
    pub worker_pool_size: usize,
    /// Depth of the bounded RX queue between sockets and workers.
    pub queue_depth: usize,
    pub request_timeout_ms: u64,
    pub community: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            socket_count: 4,
            buffer_bytes: 65_536,
            worker_pool_size: 16,
            queue_depth: 1024,
            request_timeout_ms: 5_000,
            community: "public".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    pub port_start: u16,
    pub port_end: u16,
    pub default_device_type: DeviceType,
    /// Per-port overrides of device type and community.
    #[serde(default)]
    pub port_map: Vec<PortMapEntry>,
    /// Profiles to load at startup.
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            port_start: 30000,
            port_end: 30050,
            default_device_type: DeviceType::CableModem,
            port_map: Vec::new(),
            profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapEntry {
    pub port: u16,
    pub device_type: DeviceType,
    pub community: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub device_type: DeviceType,
    /// Recorded walk file to load the shared tree from.
    pub walk_file: Option<PathBuf>,
    /// Inline OID map; takes the place of a walk file for small profiles.
    pub oids: Option<HashMap<String, ManualValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub max_devices: usize,
    pub max_memory_mb: u64,
    pub cleanup_interval_ms: u64,
    pub idle_threshold_ms: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_devices: 10_000,
            max_memory_mb: 1_024,
            cleanup_interval_ms: 60_000,
            idle_threshold_ms: 600_000,
        }
    }
}

impl ResourceConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on GETBULK repetitions, kept under the UDP MTU limit.
    pub getbulk_max_repetitions_cap: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            getbulk_max_repetitions_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    pub enabled: bool,
    /// Servers matching this pattern fail the upgrade immediately.
    pub invalid_server_regex: Option<String>,
    /// Non-zero delays run the phased upgrade state machine.
    pub phase_delay_ms: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            invalid_server_regex: None,
            phase_delay_ms: 0,
        }
    }
}

impl UpgradeConfig {
    pub fn phase_delay(&self) -> Duration {
        Duration::from_millis(self.phase_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub report_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_ms: 30_000,
        }
    }
}

impl TelemetryConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

impl SimulatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimulatorConfig = toml::from_str(&contents)
            .map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self> {
        let mut settings = config::Config::builder();

        // Load from environment variables with SNMPSIM_ prefix
        settings = settings.add_source(
            config::Environment::with_prefix("SNMPSIM")
                .separator("__"),
        );

        let config = settings.build()?;
        let simulator_config = config.try_deserialize()?;
        Ok(simulator_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.port_start > self.devices.port_end {
            return Err(Error::parse("Invalid device port range"));
        }

        if self.server.socket_count == 0 {
            return Err(Error::parse("server.socket_count must be at least 1"));
        }

        if self.server.worker_pool_size == 0 {
            return Err(Error::parse("server.worker_pool_size must be at least 1"));
        }

        if self.server.queue_depth == 0 {
            return Err(Error::parse("server.queue_depth must be at least 1"));
        }

        if self.engine.getbulk_max_repetitions_cap == 0 {
            return Err(Error::parse("engine.getbulk_max_repetitions_cap must be at least 1"));
        }

        if self.resources.max_devices == 0 {
            return Err(Error::parse("resources.max_devices must be at least 1"));
        }

        if let Some(pattern) = &self.upgrade.invalid_server_regex {
            regex::Regex::new(pattern)
                .map_err(|e| Error::parse(format!("Invalid upgrade server pattern: {}", e)))?;
        }

        for entry in &self.devices.port_map {
            if entry.port < self.devices.port_start || entry.port > self.devices.port_end {
                return Err(Error::parse(format!(
                    "port_map entry {} outside device port range",
                    entry.port
                )));
            }
        }

        for profile in &self.devices.profiles {
            if profile.walk_file.is_none() && profile.oids.is_none() {
                return Err(Error::parse(format!(
                    "profile for {} needs a walk_file or inline oids",
                    profile.device_type
                )));
            }
        }

        Ok(())
    }

    /// Resolves the device type and community for a UDP port.
    pub fn resolve_port(&self, port: u16) -> Option<(DeviceType, String)> {
        if let Some(entry) = self.devices.port_map.iter().find(|e| e.port == port) {
            let community = entry
                .community
                .clone()
                .unwrap_or_else(|| self.server.community.clone());
            return Some((entry.device_type.clone(), community));
        }

        if port >= self.devices.port_start && port <= self.devices.port_end {
            return Some((
                self.devices.default_device_type.clone(),
                self.server.community.clone(),
            ));
        }

        None
    }

    pub fn default_config() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SimulatorConfig::default_config();
        assert_eq!(config.resources.max_devices, 10_000);
        assert_eq!(config.resources.max_memory_mb, 1_024);
        assert_eq!(config.resources.cleanup_interval_ms, 60_000);
        assert_eq!(config.resources.idle_threshold_ms, 600_000);
        assert_eq!(config.server.socket_count, 4);
        assert_eq!(config.server.buffer_bytes, 65_536);
        assert_eq!(config.server.worker_pool_size, 16);
        assert_eq!(config.server.request_timeout_ms, 5_000);
        assert_eq!(config.server.community, "public");
        assert_eq!(config.engine.getbulk_max_repetitions_cap, 50);
        assert!(config.upgrade.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_port_range() {
        let mut config = SimulatorConfig::default_config();
        config.devices.port_start = 31000;
        config.devices.port_end = 30000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let mut config = SimulatorConfig::default_config();
        config.upgrade.invalid_server_regex = Some("(unclosed".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_port() {
        let mut config = SimulatorConfig::default_config();
        config.devices.port_map.push(PortMapEntry {
            port: 30001,
            device_type: DeviceType::Cmts,
            community: Some("secret".to_string()),
        });

        let (device_type, community) = config.resolve_port(30001).unwrap();
        assert_eq!(device_type, DeviceType::Cmts);
        assert_eq!(community, "secret");

        let (device_type, community) = config.resolve_port(30010).unwrap();
        assert_eq!(device_type, DeviceType::CableModem);
        assert_eq!(community, "public");

        assert!(config.resolve_port(40000).is_none());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SimulatorConfig::default_config();
        let toml_text = toml::to_string_pretty(&config).unwrap();
        let reparsed: SimulatorConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(reparsed.server.worker_pool_size, config.server.worker_pool_size);
        assert_eq!(reparsed.devices.port_start, config.devices.port_start);
    }
}
