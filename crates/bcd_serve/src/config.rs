//! Server configuration, read from YAML.

use std::path::{Path, PathBuf};

use bcd_explain::{SaliencyConfig, SurrogateConfig};
use bcd_models::{ClassifierConfig, LoadMode};
use bcd_transforms::PreprocessConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServeError};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BCD_CONFIG";

/// Top-level server configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Bind address and upload limit.
    pub server: ServerConfig,
    /// Weight archive and architecture.
    pub model: ModelConfig,
    /// Image preprocessing.
    pub preprocess: PreprocessConfig,
    /// Grad-CAM rendering.
    pub saliency: SaliencyConfig,
    /// LIME sampling and rendering.
    pub surrogate: SurrogateConfig,
    /// Session retention.
    pub sessions: SessionConfig,
    /// Log output.
    pub logs: LogsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

/// Which classifier to load and how.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Weight archive. Without one the model stays unavailable.
    pub weights_path: Option<PathBuf>,
    /// Strict or lenient layer matching.
    pub load_mode: LoadMode,
    /// Network the archive is loaded into.
    pub architecture: ClassifierConfig,
}

/// Session store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions kept before the oldest is evicted.
    pub capacity: usize,
}

/// Log output settings. `RUST_LOG` and the CLI flags take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// `EnvFilter` directive used when neither `RUST_LOG` nor `-v` is given.
    pub level: String,
    /// Emit JSON lines instead of plain text.
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl LogsConfig {
    /// Filter directive for a `-v` count: the count wins when non-zero.
    pub fn directive(&self, verbose: u8) -> String {
        match verbose {
            0 => self.level.clone(),
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }

    /// Whether to emit JSON, given the `--log-json` flag.
    pub fn use_json(&self, flag: bool) -> bool {
        flag || self.json
    }
}

impl ServeConfig {
    /// Parse a YAML document; missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Read the file named by `path`, else by `BCD_CONFIG`, else use defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Self::load(PathBuf::from(path)),
                None => Ok(Self::default()),
            },
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sessions.capacity == 0 {
            return Err(ServeError::config("sessions.capacity must be at least 1"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ServeError::config("server.max_upload_bytes must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = ServeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ServeConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.surrogate.num_samples, 500);
        assert!(config.model.weights_path.is_none());
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
server:
  port: 9001
model:
  weights_path: /models/bcd.mpk
  load_mode: lenient
sessions:
  capacity: 4
surrogate:
  num_samples: 100
  seed: 7
logs:
  level: debug
"#;
        let config = ServeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.weights_path, Some(PathBuf::from("/models/bcd.mpk")));
        assert_eq!(config.model.load_mode, LoadMode::Lenient);
        assert_eq!(config.sessions.capacity, 4);
        assert_eq!(config.surrogate.num_samples, 100);
        assert_eq!(config.surrogate.num_features, 5);
        assert_eq!(config.logs.level, "debug");
    }

    #[test]
    fn test_logs_section_drives_filter_and_format() {
        let defaults = ServeConfig::default().logs;
        assert_eq!(defaults.directive(0), "warn");
        assert!(!defaults.use_json(false));

        let config = ServeConfig::from_yaml_str("logs:\n  level: bcd_serve=debug\n  json: true\n").unwrap();
        assert_eq!(config.logs.directive(0), "bcd_serve=debug");
        assert_eq!(config.logs.directive(2), "debug");
        assert!(config.logs.use_json(false));
        assert!(defaults.use_json(true));
    }

    #[test]
    fn test_invalid_values() {
        assert!(ServeConfig::from_yaml_str("sessions:\n  capacity: 0\n").is_err());
        assert!(ServeConfig::from_yaml_str("server: [1, 2]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bcd.yaml");
        std::fs::write(&path, "server:\n  host: 127.0.0.1\n").unwrap();
        let config = ServeConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(ServeConfig::load(dir.path().join("missing.yaml")).is_err());
    }
}
