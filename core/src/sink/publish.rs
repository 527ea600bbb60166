use std::sync::Arc;

use tracing::debug;

use crate::errors::StoreError;
use crate::sink::{Destination, IngestApi, JSON_FORMAT};
use crate::source::SealedBatch;

/// Sends sealed batches to the destination table. One call per batch, no
/// retries; the caller decides what a failure means.
pub struct Publisher {
    ingest: Arc<dyn IngestApi>,
    table: String,
    mapping_name: String,
}

impl Publisher {
    pub fn new(ingest: Arc<dyn IngestApi>, destination: &Destination) -> Self {
        Self {
            ingest,
            table: destination.table.clone(),
            mapping_name: destination.mapping_name.clone(),
        }
    }

    pub async fn publish(&self, batch: &SealedBatch) -> Result<(), StoreError> {
        debug!(
            "Publishing {} records ({} bytes) to {}",
            batch.records(),
            batch.compressed_bytes(),
            self.table
        );
        self.ingest
            .streaming_ingest(&self.table, &self.mapping_name, JSON_FORMAT, batch.payload())
            .await
    }
}
