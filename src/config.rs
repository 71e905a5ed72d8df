//! Configuration management for the Schema Registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schemas.toml)
//! - Environment variables (SCHEMAS__*)
//!
//! ## Example config file (schemas.toml):
//! ```toml
//! [registry]
//! cache_compiled = true
//! validate_formats = true
//!
//! [discovery]
//! roots = ["./components/lms", "./components/catalog"]
//! read_timeout_ms = 5000
//!
//! [formats]
//! course-code = "^[A-Z]{3}-[0-9]{3}$"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the schema registry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaConfig {
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Format overrides, applied after the built-in formats
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Memoize compiled validators per schema
    #[serde(default = "default_true")]
    pub cache_compiled: bool,

    /// Enforce `format` keywords during validation
    #[serde(default = "default_true")]
    pub validate_formats: bool,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Component roots scanned in addition to the host-supplied ones
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Timeout in milliseconds for scanning a root and for reading each file
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_compiled: true,
            validate_formats: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl DiscoveryConfig {
    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SchemaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["schemas.toml", ".schemas.toml", "config/schemas.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "schemas") {
            let xdg_config = config_dir.config_dir().join("schemas.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEMAS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Configured discovery roots, relative ones resolved against the working directory
    pub fn discovery_roots(&self) -> Vec<PathBuf> {
        self.discovery
            .roots
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    std::env::current_dir().unwrap_or_default().join(p)
                }
            })
            .collect()
    }
}
