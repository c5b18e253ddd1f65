//! Configuration management for document models
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (models.toml)
//! - Environment variables (MODELS__*)
//!
//! ## Example config file (models.toml):
//! ```toml
//! [connections.default]
//! uri = "mongodb://127.0.0.1:27017/familiar"
//!
//! [connections.archive]
//! uri = "mongodb://archive.internal:27017/familiar"
//! replica_set = "rs0"
//!
//! [versioning]
//! enabled = true
//! version_count = 100
//!
//! [serialization]
//! virtuals = true
//! getters = true
//!
//! [links]
//! policy = "fail_fast"
//! include_audit_fields = false
//!
//! [audit]
//! user_model = "user"
//! ```

use std::collections::BTreeMap;

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::augment::AugmentConfig;
use crate::links::FanOutPolicy;
use crate::store::DEFAULT_CONNECTION;
use crate::versioning::DEFAULT_VERSION_COUNT;

/// Main configuration for the model layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Named store connections
    #[serde(default = "default_connections")]
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Version history settings
    #[serde(default)]
    pub versioning: VersioningConfig,

    /// Public JSON shape settings
    #[serde(default)]
    pub serialization: SerializationConfig,

    /// Link resolution settings
    #[serde(default)]
    pub links: LinksConfig,

    /// Audit field settings
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Connection settings, handed to the host that opens the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_source: Option<String>,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Version history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Capture snapshots on write
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Snapshots retained per document unless a schema overrides it
    #[serde(default = "default_version_count")]
    pub version_count: usize,
}

/// Public JSON shape configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializationConfig {
    #[serde(default = "default_true")]
    pub virtuals: bool,

    #[serde(default = "default_true")]
    pub getters: bool,
}

/// Link resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksConfig {
    #[serde(default)]
    pub policy: FanOutPolicy,

    /// Count `_created_by`/`_updated_by` as inbound links
    #[serde(default)]
    pub include_audit_fields: bool,
}

/// Audit field configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Model referenced by `_created_by` and `_updated_by`
    #[serde(default = "default_user_model")]
    pub user_model: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    10
}

fn default_version_count() -> usize {
    DEFAULT_VERSION_COUNT
}

fn default_user_model() -> String {
    "user".to_string()
}

fn default_connections() -> BTreeMap<String, ConnectionConfig> {
    let mut connections = BTreeMap::new();
    connections.insert(
        DEFAULT_CONNECTION.to_string(),
        ConnectionConfig {
            uri: "mongodb://127.0.0.1:27017/familiar".to_string(),
            replica_set: None,
            auth_source: None,
            pool_size: default_pool_size(),
        },
    );
    connections
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version_count: DEFAULT_VERSION_COUNT,
        }
    }
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            virtuals: true,
            getters: true,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            user_model: default_user_model(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            versioning: VersioningConfig::default(),
            serialization: SerializationConfig::default(),
            links: LinksConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl ModelsConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["models.toml", ".models.toml", "config/models.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "models") {
            let xdg_config = config_dir.config_dir().join("models.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Environment variables (MODELS__VERSIONING__VERSION_COUNT=10)
        builder = builder.add_source(
            Environment::with_prefix("MODELS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Augmentation defaults derived from this configuration
    pub fn augment_config(&self) -> AugmentConfig {
        AugmentConfig {
            user_model: self.audit.user_model.clone(),
            version_count: self.versioning.version_count,
            versions_enabled: self.versioning.enabled,
            virtuals: self.serialization.virtuals,
            getters: self.serialization.getters,
            link_policy: self.links.policy,
            audit_links: self.links.include_audit_fields,
        }
    }
}
