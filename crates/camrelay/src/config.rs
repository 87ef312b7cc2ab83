use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::camera::Credentials;

/// Environment variable overriding `camera.user`
pub const ENV_CAM_USER: &str = "CAM_USER";
/// Environment variable overriding `camera.password`
pub const ENV_CAM_PASSWORD: &str = "CAM_PASSWORD";

/// Destination relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host name or IP address of the relay server
    pub host: String,
    /// TCP port for the video stream
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for a single TCP handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for writing one framed image
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Fixed wait between failed connect attempts
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
}

impl RelayConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

fn default_port() -> u16 {
    8000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

/// Output frame size; zero in either dimension keeps the native size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl Resize {
    pub fn is_enabled(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// How every discovered camera is reached and encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// RTSP port on the camera
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    /// Stream path (e.g. the Hikvision sub-stream)
    #[serde(default = "default_path")]
    pub path: String,
    /// Latency in milliseconds for the RTSP jitter buffer
    #[serde(default = "default_latency")]
    pub latency: u32,
    /// Optional output size
    #[serde(default)]
    pub resize: Option<Resize>,
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Pause between closing and reopening a capture session
    #[serde(default = "default_reopen_delay_ms")]
    pub reopen_delay_ms: u64,
    /// A read that yields no frame within this window counts as an empty frame
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            rtsp_port: default_rtsp_port(),
            path: default_path(),
            latency: default_latency(),
            resize: None,
            jpeg_quality: default_jpeg_quality(),
            reopen_delay_ms: default_reopen_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            user: None,
            password: None,
        }
    }
}

impl CameraSettings {
    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Credentials to embed in the RTSP URL, if both user and password are set
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) if !user.is_empty() => Some(Credentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Overlay `CAM_USER` / `CAM_PASSWORD` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_CAM_USER).ok(),
            std::env::var(ENV_CAM_PASSWORD).ok(),
        );
    }

    fn apply_overrides(&mut self, user: Option<String>, password: Option<String>) {
        if let Some(user) = user.filter(|u| !u.is_empty()) {
            self.user = Some(user);
        }
        if let Some(password) = password {
            self.password = Some(password);
        }
    }
}

fn default_rtsp_port() -> u16 {
    554
}

fn default_path() -> String {
    "/Streaming/Channels/102".to_string()
}

fn default_latency() -> u32 {
    200
}

fn default_jpeg_quality() -> u8 {
    70
}

fn default_reopen_delay_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

/// Where the camera list comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Ping-scan the local /24 with nmap
    #[default]
    Nmap,
    /// Use `discovery.addresses` verbatim
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,
    /// Camera hosts for static mode
    #[serde(default)]
    pub addresses: Vec<String>,
    /// CIDR to scan instead of the host's /24
    #[serde(default)]
    pub network: Option<String>,
    /// Vendor names or MAC prefixes matched against nmap output
    #[serde(default = "default_filter_devices")]
    pub filter_devices: Vec<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            addresses: Vec::new(),
            network: None,
            filter_devices: default_filter_devices(),
            retries: default_retries(),
            use_sudo: default_use_sudo(),
        }
    }
}

fn default_filter_devices() -> Vec<String> {
    vec!["Hikvision".to_string()]
}

fn default_retries() -> u32 {
    3
}

fn default_use_sudo() -> bool {
    true
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "relay.host must not be empty".into(),
            ));
        }
        if self.relay.port == 0 {
            return Err(ConfigError::ValidationError(
                "relay.port must be non-zero".into(),
            ));
        }
        if self.relay.reconnect_backoff_secs == 0 {
            return Err(ConfigError::ValidationError(
                "relay.reconnect_backoff_secs must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(ConfigError::ValidationError(format!(
                "camera.jpeg_quality must be in 1..=100, got {}",
                self.camera.jpeg_quality
            )));
        }
        if self.camera.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "camera.read_timeout_ms must be non-zero".into(),
            ));
        }
        if self.discovery.mode == DiscoveryMode::Nmap && self.discovery.retries == 0 {
            return Err(ConfigError::ValidationError(
                "discovery.retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
