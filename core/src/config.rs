use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{ConfigError, Result};
use crate::schema::{DEFAULT_SCHEMA, TableSchema};

/// Environment variable holding a YAML config document.
pub const CONFIG_ENV_VAR: &str = "LOGSHIP_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShipperConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Engine endpoint, e.g. `https://mycluster.westus2.kusto.windows.net`.
    pub uri: String,
    pub database: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// A bearer token acquired outside the shipper.
    Token { token: String },
    /// AAD application (client credentials) sign-in.
    Application {
        tenant_id: String,
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        #[serde(default)]
        authority_host: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Explicit table name. Derived from the operator's user name when unset.
    pub table: Option<String>,
    pub table_suffix: String,
    pub mapping_name: String,
    pub tag_key: String,
    pub force_update: bool,
    /// `name:type,...` column list. The built-in events schema when unset.
    pub schema: Option<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            table: None,
            table_suffix: "Events".to_string(),
            mapping_name: "jsonmapping1".to_string(),
            tag_key: "DevInstanceId".to_string(),
            force_update: false,
            schema: None,
        }
    }
}

impl DestinationConfig {
    pub fn table_name(&self) -> std::result::Result<String, ConfigError> {
        if let Some(table) = &self.table {
            return Ok(table.clone());
        }
        let user = operator_name().ok_or_else(|| ConfigError::MissingField {
            field: "destination.table".to_string(),
        })?;
        Ok(format!("{}{}", user, self.table_suffix))
    }

    pub fn table_schema(&self) -> Result<TableSchema> {
        let schema = self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA).parse()?;
        Ok(schema)
    }
}

fn operator_name() -> Option<String> {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub window_ms: u64,
    pub settle_delay_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub publish_empty_batches: bool,
    pub compression_level: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            settle_delay_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 60_000,
            publish_empty_batches: false,
            compression_level: 6,
        }
    }
}

impl ProcessingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Loads from `config_path` if given, otherwise from [`CONFIG_ENV_VAR`].
/// Returns `None` when neither is available.
pub fn load_config(config_path: Option<&Path>) -> Result<Option<ShipperConfig>> {
    match config_path {
        Some(path) => ShipperConfig::from_file(path).map(Some),
        None => match std::env::var(CONFIG_ENV_VAR) {
            Ok(_) => ShipperConfig::from_env().map(Some),
            Err(_) => Ok(None),
        },
    }
}

impl ShipperConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            cluster: ClusterConfig {
                uri: uri.into(),
                database: database.into(),
                auth: None,
            },
            destination: DestinationConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.display().to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content, &path.display().to_string())
    }

    pub fn from_env() -> Result<Self> {
        let config_str = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::MissingField {
            field: CONFIG_ENV_VAR.to_string(),
        })?;
        Self::from_yaml(&config_str, CONFIG_ENV_VAR)
    }

    fn from_yaml(content: &str, origin: &str) -> Result<Self> {
        let config: ShipperConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::LoadFailed {
                origin: origin.to_string(),
                error: Box::new(e),
            })?;
        Ok(config)
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.uri.trim().is_empty() {
            return Err(invalid("Cluster URI cannot be empty"));
        }
        if !self.cluster.uri.starts_with("http://") && !self.cluster.uri.starts_with("https://") {
            return Err(invalid("Cluster URI must be an http(s) URL"));
        }
        if self.cluster.database.trim().is_empty() {
            return Err(invalid("Database cannot be empty"));
        }
        match &self.cluster.auth {
            None => {
                return Err(ConfigError::MissingField {
                    field: "cluster.auth".to_string(),
                }
                .into());
            }
            Some(AuthConfig::Token { token }) if token.is_empty() => {
                return Err(invalid("Bearer token cannot be empty"));
            }
            Some(AuthConfig::Application { client_secret, .. })
                if client_secret.as_deref().unwrap_or_default().is_empty() =>
            {
                return Err(ConfigError::MissingField {
                    field: "cluster.auth.client_secret".to_string(),
                }
                .into());
            }
            Some(_) => {}
        }

        let table = self.destination.table_name()?;
        if table.is_empty() {
            return Err(invalid("Table name cannot be empty"));
        }
        // Table names are sent as ['name'] in management commands
        if table.contains(['\'', '\\']) || table.chars().any(char::is_control) {
            return Err(invalid(&format!(
                "Table name '{}' cannot contain quotes, backslashes or control characters",
                table
            )));
        }
        if self.destination.mapping_name.is_empty() {
            return Err(invalid("Mapping name cannot be empty"));
        }
        if self.destination.tag_key.is_empty() {
            return Err(invalid("Session tag key cannot be empty"));
        }

        let schema = self.destination.table_schema()?;
        if !schema.contains(&self.destination.tag_key) {
            return Err(invalid(&format!(
                "Table schema has no '{}' column for the session id",
                self.destination.tag_key
            )));
        }

        if self.processing.request_timeout_ms == 0 {
            return Err(invalid("Request timeout must be greater than zero"));
        }
        if self.processing.compression_level > 9 {
            return Err(invalid("Compression level must be between 0 and 9"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> crate::errors::ShipperError {
    ConfigError::ValidationFailed {
        reason: reason.to_string(),
    }
    .into()
}
