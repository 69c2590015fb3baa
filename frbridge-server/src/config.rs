//! Bridge configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FRBRIDGE_CONFIG or --config)
//! 3. Environment variables

use frbridge_core::overrides::MAX_OVERRIDE_CAPACITY;
use frbridge_core::{
    CacheRule, PipelineConfig, RuleSet, TriggerRule, DEFAULT_FIFO_CAPACITY,
    DEFAULT_OVERRIDE_CAPACITY, MAX_CAPTURE_RING_BYTES, MIN_CAPTURE_RING_BYTES,
};
use frbridge_protocol::{Direction, MAX_RECORD_BODY, RECORD_LEN_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host transport configuration.
    pub network: NetworkConfig,
    /// Capture rings and replay source.
    pub capture: CaptureConfig,
    /// Output frame queue.
    pub fifo: FifoConfig,
    /// Cache/trigger rules and override store.
    pub injector: InjectorConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FRBRIDGE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.capture.apply_env_overrides();
        self.fifo.apply_env_overrides();
        self.injector.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks sizes and rules before anything is allocated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.capture.validate()?;
        check_power_of_two("fifo.capacity", self.fifo.capacity)?;
        self.injector.validate()
    }

    /// Sizing and rules for the frame processing pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ring_bytes: self.capture.ring_bytes,
            notify_capacity: self.capture.notify_capacity,
            fifo_capacity: self.fifo.capacity,
            override_capacity: self.injector.override_capacity,
            injection_enabled: self.injector.enabled,
            rules: self.injector.rules(),
        }
    }
}

/// Host transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind: SocketAddr,
    /// Maximum concurrent host connections.
    pub max_connections: usize,
    /// Largest single export write in bytes.
    pub export_batch_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], frbridge_protocol::DEFAULT_PORT)),
            max_connections: 4,
            export_batch_bytes: 4096,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FRBRIDGE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind = parsed;
            }
        }

        if let Ok(max) = std::env::var("FRBRIDGE_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(bytes) = std::env::var("FRBRIDGE_EXPORT_BATCH_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.export_batch_bytes = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        let largest_record = RECORD_LEN_SIZE + MAX_RECORD_BODY;
        if self.export_batch_bytes < largest_record {
            return Err(ConfigError::ValidationError(format!(
                "network.export_batch_bytes must hold one full record ({} bytes), got {}",
                largest_record, self.export_batch_bytes
            )));
        }
        Ok(())
    }
}

/// Capture rings and the replay capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bytes per direction capture ring (power of two).
    pub ring_bytes: usize,
    /// Notification ring capacity (power of two).
    pub notify_capacity: usize,
    /// Capture file to replay; no capture source runs without one.
    #[serde(default)]
    pub replay_file: Option<PathBuf>,
    /// Pause between replayed frames in microseconds.
    pub replay_interval_us: u64,
    /// Restart from the beginning when the file is exhausted.
    pub replay_loop: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_bytes: 4096,
            notify_capacity: 1024,
            replay_file: None,
            replay_interval_us: 250,
            replay_loop: false,
        }
    }
}

impl CaptureConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(bytes) = std::env::var("FRBRIDGE_CAPTURE_RING_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.ring_bytes = n;
            }
        }

        if let Ok(cap) = std::env::var("FRBRIDGE_NOTIFY_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.notify_capacity = n;
            }
        }

        if let Ok(path) = std::env::var("FRBRIDGE_REPLAY_FILE") {
            self.replay_file = Some(PathBuf::from(path));
        }

        if let Ok(interval) = std::env::var("FRBRIDGE_REPLAY_INTERVAL_US") {
            if let Ok(us) = interval.parse() {
                self.replay_interval_us = us;
            }
        }

        if let Ok(looping) = std::env::var("FRBRIDGE_REPLAY_LOOP") {
            self.replay_loop = parse_bool(&looping);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_power_of_two("capture.ring_bytes", self.ring_bytes)?;
        if !(MIN_CAPTURE_RING_BYTES..=MAX_CAPTURE_RING_BYTES).contains(&self.ring_bytes) {
            return Err(ConfigError::ValidationError(format!(
                "capture.ring_bytes must be between {} and {}, got {}",
                MIN_CAPTURE_RING_BYTES, MAX_CAPTURE_RING_BYTES, self.ring_bytes
            )));
        }
        check_power_of_two("capture.notify_capacity", self.notify_capacity)
    }

    /// Returns the replay pacing as Duration.
    pub fn replay_interval(&self) -> Duration {
        Duration::from_micros(self.replay_interval_us)
    }
}

/// Output frame queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoConfig {
    /// Queue capacity in frames (power of two).
    pub capacity: usize,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FIFO_CAPACITY,
        }
    }
}

impl FifoConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(cap) = std::env::var("FRBRIDGE_FIFO_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.capacity = n;
            }
        }
    }
}

/// Injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    /// Injection enabled at startup.
    pub enabled: bool,
    /// Number of host override slots.
    pub override_capacity: usize,
    pub cache_rules: Vec<CacheRule>,
    pub trigger_rules: Vec<TriggerRule>,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        // EPS torque frame 0x44 on even cycles, injected when 0x40 arrives
        Self {
            enabled: false,
            override_capacity: DEFAULT_OVERRIDE_CAPACITY,
            cache_rules: vec![CacheRule {
                watch_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
            }],
            trigger_rules: vec![TriggerRule {
                trigger_id: 0x40,
                target_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
                e2e_offset: 9,
                e2e_len: 7,
                e2e_init: 0xDC,
                replace_offset: 12,
                replace_len: 2,
                direction: Direction::ToEcu,
            }],
        }
    }
}

impl InjectorConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FRBRIDGE_INJECTION_ENABLED") {
            self.enabled = parse_bool(&enabled);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.override_capacity == 0 || self.override_capacity > MAX_OVERRIDE_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "injector.override_capacity must be between 1 and {}, got {}",
                MAX_OVERRIDE_CAPACITY, self.override_capacity
            )));
        }
        self.rules()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("injector: {}", e)))
    }

    pub fn rules(&self) -> RuleSet {
        RuleSet {
            cache_rules: self.cache_rules.clone(),
            trigger_rules: self.trigger_rules.clone(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 9800)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FRBRIDGE_METRICS_ENABLED") {
            self.enabled = parse_bool(&enabled);
        }
        if let Ok(addr) = std::env::var("FRBRIDGE_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind = parsed;
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

fn check_power_of_two(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || !value.is_power_of_two() {
        return Err(ConfigError::ValidationError(format!(
            "{} must be a non-zero power of two, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
