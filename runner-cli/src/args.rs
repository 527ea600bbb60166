use anyhow::{Result, bail};
use clap::Parser;
use logship_core::ShipperConfig;
use logship_core::config::{AuthConfig, load_config};
use std::path::PathBuf;

/// logship - relay JSON log lines from stdin to an Azure Data Explorer table
#[derive(Parser, Debug)]
#[command(name = "logship")]
#[command(version)]
#[command(about = "Ship newline-delimited JSON logs from stdin to Azure Data Explorer", long_about = None)]
pub struct Cli {
    /// YAML config file (falls back to the LOGSHIP_CONFIG variable)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Cluster URI, e.g. https://mycluster.westus2.kusto.windows.net
    #[arg(long = "cluster", env = "LOGSHIP_CLUSTER")]
    pub cluster: Option<String>,

    /// Database holding the destination table
    #[arg(long = "database", env = "LOGSHIP_DATABASE")]
    pub database: Option<String>,

    /// Destination table (default: <user>Events)
    #[arg(long = "table")]
    pub table: Option<String>,

    /// Ingestion mapping name
    #[arg(long = "mapping")]
    pub mapping: Option<String>,

    /// Column list as name:type,... (default: built-in events schema)
    #[arg(long = "schema")]
    pub schema: Option<String>,

    /// Create or update the table and mapping even if the table exists
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Batch window in milliseconds
    #[arg(long = "window-ms")]
    pub window_ms: Option<u64>,

    /// Wait after each schema change, in milliseconds
    #[arg(long = "settle-delay-ms")]
    pub settle_delay_ms: Option<u64>,

    /// Publish batches even when they hold no records
    #[arg(long = "publish-empty")]
    pub publish_empty: bool,

    /// Pre-acquired bearer token
    #[arg(long = "token", env = "LOGSHIP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// AAD tenant for application sign-in
    #[arg(long = "tenant-id", env = "LOGSHIP_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// AAD application (client) id
    #[arg(long = "client-id", env = "LOGSHIP_CLIENT_ID")]
    pub client_id: Option<String>,

    /// AAD application secret
    #[arg(long = "client-secret", env = "LOGSHIP_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
}

impl Cli {
    /// Builds the effective config: file or env first, flags on top.
    pub fn into_config(self) -> Result<ShipperConfig> {
        let mut config = match load_config(self.config.as_deref())? {
            Some(config) => config,
            None => match (&self.cluster, &self.database) {
                (Some(cluster), Some(database)) => ShipperConfig::new(cluster, database),
                _ => bail!(
                    "no configuration: pass --config, set LOGSHIP_CONFIG, or pass --cluster and --database"
                ),
            },
        };

        if let Some(cluster) = self.cluster {
            config.cluster.uri = cluster;
        }
        if let Some(database) = self.database {
            config.cluster.database = database;
        }

        if let Some(token) = self.token {
            config.cluster.auth = Some(AuthConfig::Token { token });
        } else if let (Some(tenant_id), Some(client_id)) = (self.tenant_id, self.client_id) {
            config.cluster.auth = Some(AuthConfig::Application {
                tenant_id,
                client_id,
                client_secret: self.client_secret,
                authority_host: None,
            });
        } else if let Some(AuthConfig::Application { client_secret, .. }) = &mut config.cluster.auth {
            if client_secret.is_none() {
                *client_secret = self.client_secret;
            }
        }

        let destination = &mut config.destination;
        if self.table.is_some() {
            destination.table = self.table;
        }
        if let Some(mapping) = self.mapping {
            destination.mapping_name = mapping;
        }
        if self.schema.is_some() {
            destination.schema = self.schema;
        }
        destination.force_update |= self.force;

        let processing = &mut config.processing;
        if let Some(window_ms) = self.window_ms {
            processing.window_ms = window_ms;
        }
        if let Some(settle_delay_ms) = self.settle_delay_ms {
            processing.settle_delay_ms = settle_delay_ms;
        }
        processing.publish_empty_batches |= self.publish_empty;

        Ok(config)
    }
}
