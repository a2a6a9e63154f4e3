use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dialects::Dialect;
use crate::error::{TransformationError, TransformationResult};
use crate::model::HanaVersion;
use crate::utils::correction::AutoFixConfig;

/// Settings consumed by the transformer, loadable from TOML and the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransformationConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub correction: AutoFixConfig,
    #[serde(default)]
    pub packages: PackageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default = "default_hana_version")]
    pub hana_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaConfig {
    /// Source schema name to replacement schema name.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    /// When set, every physical source is read from this schema.
    #[serde(default)]
    pub target_schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CurrencyConfig {
    #[serde(default)]
    pub udf_name: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub rates_table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub create_view: bool,
    #[serde(default)]
    pub view_name: Option<String>,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub auto_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackageConfig {
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
}

fn default_dialect() -> String {
    Dialect::default().name().to_string()
}

fn default_hana_version() -> String {
    HanaVersion::default().name().to_string()
}

fn default_client() -> String {
    "PROD".to_string()
}

fn default_language() -> String {
    "EN".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            hana_version: default_hana_version(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            client: default_client(),
            language: default_language(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            create_view: false,
            view_name: None,
            validate: true,
            auto_correct: false,
        }
    }
}

impl TargetConfig {
    pub fn dialect(&self) -> TransformationResult<Dialect> {
        Dialect::from_str(&self.dialect).map_err(|e| TransformationError::config(&e))
    }

    pub fn hana_version(&self) -> TransformationResult<HanaVersion> {
        HanaVersion::from_str(&self.hana_version).map_err(|e| TransformationError::config(&e))
    }
}

impl TransformationConfig {
    pub fn from_toml_str(content: &str) -> TransformationResult<Self> {
        let config: TransformationConfig = toml::from_str(content)
            .map_err(|e| TransformationError::config(&format!("Invalid TOML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> TransformationResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TransformationError::config(&format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        debug!("Loading configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Start from `CVT_CONFIG` (or defaults) and apply the `CVT_*` overrides.
    pub fn from_env() -> TransformationResult<Self> {
        let mut config = match env::var("CVT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let read = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        if let Some(dialect) = read("CVT_DIALECT") {
            self.target.dialect = dialect;
        }
        if let Some(version) = read("CVT_HANA_VERSION") {
            self.target.hana_version = version;
        }
        if let Some(client) = read("CVT_CLIENT") {
            self.defaults.client = client;
        }
        if let Some(language) = read("CVT_LANGUAGE") {
            self.defaults.language = language;
        }
        if let Some(schema) = read("CVT_TARGET_SCHEMA") {
            self.schema.target_schema = Some(schema);
        }
    }

    pub fn validate(&self) -> TransformationResult<()> {
        self.target.dialect()?;
        self.target.hana_version()?;
        if self.defaults.client.trim().is_empty() {
            return Err(TransformationError::config("defaults.client must not be empty"));
        }
        if self.defaults.language.trim().is_empty() {
            return Err(TransformationError::config("defaults.language must not be empty"));
        }
        if let Some(schema) = &self.schema.target_schema {
            if schema.trim().is_empty() {
                return Err(TransformationError::config("schema.target_schema must not be empty when set"));
            }
        }
        if self.output.create_view {
            if let Some(name) = &self.output.view_name {
                if name.trim().is_empty() {
                    return Err(TransformationError::config("output.view_name must not be empty when set"));
                }
            }
        }
        if let Some(file) = &self.packages.mapping_file {
            if !file.exists() {
                return Err(TransformationError::config(&format!(
                    "Package mapping file not found: {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolve a source schema through the universal target schema, then the override map.
    pub fn resolve_schema(&self, schema: &str) -> String {
        if let Some(target) = &self.schema.target_schema {
            return target.clone();
        }
        self.schema
            .overrides
            .get(schema)
            .cloned()
            .unwrap_or_else(|| schema.to_string())
    }
}
