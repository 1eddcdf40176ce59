use dataq_protocol::{
    ConnectMode, DeviceAddress, TransportConfig, DEFAULT_DEVICE_PORT, DEFAULT_LOCAL_PORT,
    DEFAULT_SESSION_ID,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {var}: {value}")]
    InvalidEnvValue { var: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to run one acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Device address; discovery is used when absent
    pub address: Option<IpAddr>,
    pub device_port: u16,
    pub local_port: u16,
    pub session_id: u32,
    /// 0 = slave, 1 = master, 2 = standalone
    pub connect_mode: u32,
    pub request_timeout_ms: u64,
    pub discovery_timeout_ms: u64,

    pub decimation: u32,
    pub decimation_averaging: u32,
    pub sample_rate: u32,
    /// Channel spec per scan-list slot, in slot order
    pub scan_list: Vec<String>,
    pub filter_channel: String,
    pub filter_mode: u32,
    pub packet_size: u32,

    pub keep_alive_interval_ms: u64,
    /// Device-side keep-alive timeout, left untouched when absent
    pub keep_alive_setting: Option<u32>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            address: None,
            device_port: DEFAULT_DEVICE_PORT,
            local_port: DEFAULT_LOCAL_PORT,
            session_id: DEFAULT_SESSION_ID,
            connect_mode: ConnectMode::Standalone as u32,
            request_timeout_ms: 2000,
            discovery_timeout_ms: 2000,
            decimation: 500,
            decimation_averaging: 4,
            sample_rate: 30000,
            scan_list: (0..8).map(|channel| channel.to_string()).collect(),
            filter_channel: "*".to_string(),
            filter_mode: 1,
            packet_size: 0,
            keep_alive_interval_ms: 1000,
            keep_alive_setting: None,
        }
    }
}

impl AcquisitionConfig {
    /// Defaults, then the optional JSON file, then `.env` and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(address) = env_value("DATAQ_ADDRESS")? {
            self.address = Some(address);
        }
        if let Some(port) = env_value("DATAQ_PORT")? {
            self.device_port = port;
        }
        if let Some(port) = env_value("DATAQ_LOCAL_PORT")? {
            self.local_port = port;
        }
        if let Some(rate) = env_value("DATAQ_SAMPLE_RATE")? {
            self.sample_rate = rate;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_list.is_empty() {
            return Err(ConfigError::Invalid("scan list cannot be empty".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rate must be positive".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery timeout must be positive".to_string(),
            ));
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "keep-alive interval must be positive".to_string(),
            ));
        }
        if ConnectMode::try_from(self.connect_mode).is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown connect mode {}",
                self.connect_mode
            )));
        }
        Ok(())
    }

    pub fn connect_mode(&self) -> ConnectMode {
        ConnectMode::try_from(self.connect_mode).unwrap_or_default()
    }

    pub fn device_address(&self) -> Option<DeviceAddress> {
        self.address
            .map(|host| DeviceAddress::new(host, self.device_port))
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            local_port: self.local_port,
            read_timeout: self.request_timeout(),
            session_id: self.session_id,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }
}

fn env_value<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in [
            "DATAQ_ADDRESS",
            "DATAQ_PORT",
            "DATAQ_LOCAL_PORT",
            "DATAQ_SAMPLE_RATE",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_match_device_demo() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.device_port, 51235);
        assert_eq!(config.local_port, 1234);
        assert_eq!(config.scan_list.len(), 8);
        assert_eq!(config.connect_mode(), ConnectMode::Standalone);
        assert!(config.device_address().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_then_env_precedence() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "address": "192.168.1.50", "sample_rate": 1000, "scan_list": ["0", "1"] }}"#
        )
        .unwrap();

        env::set_var("DATAQ_SAMPLE_RATE", "2000");
        let config = AcquisitionConfig::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.sample_rate, 2000);
        assert_eq!(config.scan_list, vec!["0", "1"]);
        assert_eq!(
            config.device_address().unwrap().to_string(),
            "192.168.1.50:51235"
        );
        // Untouched fields keep their defaults
        assert_eq!(config.decimation, 500);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        env::set_var("DATAQ_PORT", "not-a-port");
        let result = AcquisitionConfig::load(None);
        clear_env();

        match result {
            Err(ConfigError::InvalidEnvValue { var, .. }) => assert_eq!(var, "DATAQ_PORT"),
            other => panic!("Expected InvalidEnvValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let config = AcquisitionConfig {
            scan_list: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AcquisitionConfig {
            connect_mode: 7,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for config in [
            AcquisitionConfig {
                request_timeout_ms: 0,
                ..Default::default()
            },
            AcquisitionConfig {
                discovery_timeout_ms: 0,
                ..Default::default()
            },
        ] {
            match config.validate() {
                Err(ConfigError::Invalid(reason)) => assert!(reason.contains("timeout")),
                other => panic!("Expected Invalid, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_zero_timeout_in_file_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "request_timeout_ms": 0 }}"#).unwrap();

        let config = AcquisitionConfig::from_file(file.path()).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AcquisitionConfig::from_file(Path::new("/nonexistent/dataq.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
