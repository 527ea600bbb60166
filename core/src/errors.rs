use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Provisioning error: {0}")]
    Provision(#[source] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[source] StoreError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Problems found while parsing a `name:type,...` column list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Column spec '{spec}' is missing the ':' separator")]
    MissingSeparator { spec: String },

    #[error("Column spec '{spec}' has an empty name")]
    EmptyName { spec: String },

    #[error("Column name '{name}' contains characters that make its mapping path ambiguous")]
    AmbiguousName { name: String },

    #[error("Column '{name}' has unknown type '{type_name}'")]
    UnknownType { name: String, type_name: String },

    #[error("Column '{name}' is defined more than once")]
    DuplicateColumn { name: String },

    #[error("Schema has no columns")]
    Empty,
}

/// Failures talking to the remote store, either management or ingest.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Service returned {status}: {message}")]
    Service { status: StatusCode, message: String },

    #[error("Failed to decode response: {reason}")]
    Decode { reason: String },

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read from input: {0}")]
    Read(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    Json { reason: String },

    #[error("YAML serialization failed: {reason}")]
    Yaml { reason: String },

    #[error("Compression failed: {reason}")]
    Compression { reason: String },
}

pub type Result<T> = std::result::Result<T, ShipperError>;

impl From<serde_json::Error> for ShipperError {
    fn from(err: serde_json::Error) -> Self {
        ShipperError::Serialization(SerializationError::Json {
            reason: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for ShipperError {
    fn from(err: serde_yaml::Error) -> Self {
        ShipperError::Serialization(SerializationError::Yaml {
            reason: err.to_string(),
        })
    }
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport { source, .. } => !source.is_builder(),
            StoreError::Service { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            StoreError::Decode { .. } => false,
            StoreError::Auth { .. } => false,
        }
    }
}

impl ShipperError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ShipperError::Publish(e) => e.is_retryable(),
            // Provisioning failures abort startup
            _ => false,
        }
    }

    /// The pipeline phase this error aborts, used in the fatal diagnostic.
    pub fn phase(&self) -> &'static str {
        match self {
            ShipperError::Config(_) | ShipperError::Schema(_) => "configuration",
            ShipperError::Provision(_) => "provisioning",
            ShipperError::Publish(_) => "publish",
            ShipperError::Input(_) | ShipperError::Io(_) => "input",
            ShipperError::Serialization(_) => "batch assembly",
            ShipperError::Generic(_) => "run",
        }
    }
}
