use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RuntimeError};

pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_ROOT: &str = "devices";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identifies the device on the broker; also the session's client id
    /// and user name.
    pub device_id: String,
    pub auth_token: String,
    pub server: String,
    pub port: u16,
    pub secure: bool,
    pub topic_root: String,
    pub heartbeat_interval_ms: u64,
    /// Republish every known pin right after a successful connect.
    pub sync_on_connect: bool,
    pub firmware_version: String,
}

impl RuntimeConfig {
    pub fn new(device_id: &str, auth_token: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            auth_token: auth_token.to_string(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(alloc::format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// The device id becomes a topic segment, so it must be one.
    pub fn validate(&self) -> Result<()> {
        if self.device_id.is_empty() {
            return Err(RuntimeError::Config("device_id is empty".to_string()));
        }
        if self.device_id.contains(['/', '+', '#']) {
            return Err(RuntimeError::Config(alloc::format!(
                "device_id {:?} contains a topic delimiter or wildcard",
                self.device_id
            )));
        }
        if self.port == 0 {
            return Err(RuntimeError::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            auth_token: String::new(),
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            secure: false,
            topic_root: DEFAULT_TOPIC_ROOT.to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            sync_on_connect: false,
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
