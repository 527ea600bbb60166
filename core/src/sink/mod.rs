pub mod auth;
pub mod kusto;
pub mod provision;
pub mod publish;

use async_trait::async_trait;

use crate::config::DestinationConfig;
use crate::errors::{Result, StoreError};
use crate::schema::{FieldMapping, TableSchema};

pub use kusto::KustoClient;
pub use provision::{ProvisionOutcome, Provisioner};
pub use publish::Publisher;

/// Stream format name used for newline-delimited JSON payloads.
pub const JSON_FORMAT: &str = "json";

/// Schema and mapping management on the remote store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn table_exists(&self, table: &str) -> std::result::Result<bool, StoreError>;

    /// The table's current column list, `None` if the table is unknown.
    async fn table_schema(
        &self,
        table: &str,
    ) -> std::result::Result<Option<TableSchema>, StoreError>;

    async fn create_or_alter_table(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> std::result::Result<(), StoreError>;

    async fn create_or_alter_mapping(
        &self,
        table: &str,
        mapping_name: &str,
        mapping_document: &str,
    ) -> std::result::Result<(), StoreError>;
}

/// Synchronous streaming ingestion into one table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// `payload` is gzip-compressed data in `format`.
    async fn streaming_ingest(
        &self,
        table: &str,
        mapping_name: &str,
        format: &str,
        payload: &[u8],
    ) -> std::result::Result<(), StoreError>;
}

/// Everything the pipeline needs to know about where records go.
#[derive(Debug, Clone)]
pub struct Destination {
    pub table: String,
    pub mapping_name: String,
    pub schema: TableSchema,
    pub mapping_document: String,
}

impl Destination {
    pub fn from_config(config: &DestinationConfig) -> Result<Self> {
        let schema = config.table_schema()?;
        let mapping_document = FieldMapping::compile(&schema).to_json()?;
        Ok(Self {
            table: config.table_name()?,
            mapping_name: config.mapping_name.clone(),
            schema,
            mapping_document,
        })
    }
}
