use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ShipperConfig;
use crate::errors::{Result, ShipperError};
use crate::session::Session;
use crate::sink::{
    Destination, IngestApi, ManagementApi, ProvisionOutcome, Provisioner, Publisher,
};
use crate::source::{BatchEnd, LineBatcher, SealedBatch};
use crate::telemetry::ShipMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Provisioning,
    Steady,
    Terminated,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    EndOfInput,
    Interrupted,
}

/// The ingestor orchestrates the data flow from the line source to the store:
/// provision once, then assemble and publish batches until the input ends or
/// the run is cancelled.
pub struct Ingestor<R> {
    destination: Destination,
    provisioner: Provisioner,
    publisher: Publisher,
    batcher: LineBatcher<R>,
    force_update: bool,
    publish_empty_batches: bool,
    max_retries: u32,
    retry_delay: Duration,
    state: RunState,
    metrics: ShipMetrics,
}

impl<R> Ingestor<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        config: &ShipperConfig,
        session: Session,
        input: R,
        management: Arc<dyn ManagementApi>,
        ingest: Arc<dyn IngestApi>,
    ) -> Result<Self> {
        let destination = Destination::from_config(&config.destination)?;
        let processing = &config.processing;

        Ok(Self {
            provisioner: Provisioner::new(management, processing.settle_delay()),
            publisher: Publisher::new(ingest, &destination),
            batcher: LineBatcher::new(input, session, processing.window())
                .with_compression_level(processing.compression_level),
            destination,
            force_update: config.destination.force_update,
            publish_empty_batches: processing.publish_empty_batches,
            max_retries: processing.max_retries,
            retry_delay: processing.retry_delay(),
            state: RunState::Start,
            metrics: ShipMetrics::default(),
        })
    }

    /// Provisions the destination, then runs batches until the input ends,
    /// the token is cancelled, or an error occurs.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<Termination> {
        self.provision().await?;
        self.run_steady(cancel).await
    }

    pub async fn provision(&mut self) -> Result<ProvisionOutcome> {
        self.state = RunState::Provisioning;
        match self
            .provisioner
            .ensure(&self.destination, self.force_update)
            .await
        {
            Ok(outcome) => {
                self.state = RunState::Steady;
                Ok(outcome)
            }
            Err(e) => {
                self.state = RunState::Terminated;
                Err(ShipperError::Provision(e))
            }
        }
    }

    /// Batch loop. Cancellation is checked between batches; a batch that is
    /// open when the token fires is still sealed and published.
    pub async fn run_steady(&mut self, cancel: &CancellationToken) -> Result<Termination> {
        loop {
            if cancel.is_cancelled() {
                self.state = RunState::Terminated;
                return Ok(Termination::Interrupted);
            }

            match self.run_once(cancel).await {
                Ok(Some(termination)) => {
                    self.state = RunState::Terminated;
                    info!("Stopping: {:?}. Metrics: {:?}", termination, self.metrics);
                    return Ok(termination);
                }
                Ok(None) => {}
                Err(e) => {
                    self.state = RunState::Terminated;
                    return Err(e);
                }
            }
        }
    }

    /// Assembles one batch and publishes it. Returns the reason to stop when
    /// this was the last batch.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<Option<Termination>> {
        let batch = self.batcher.next_batch(cancel).await?;
        self.metrics.lines_read += batch.lines_read();
        self.metrics.lines_dropped += batch.lines_dropped();

        if batch.is_empty() && !self.publish_empty_batches {
            self.metrics.empty_batches_skipped += 1;
        } else {
            self.publish_with_retry(&batch).await?;
            self.metrics.records_accepted += batch.records() as u64;
            self.metrics.raw_bytes += batch.raw_bytes();
            self.metrics.compressed_bytes += batch.compressed_bytes();
            self.metrics.batches_published += 1;
            info!(
                "Published {} records to {} (batch opened {})",
                batch.records(),
                self.destination.table,
                batch.started_at().format("%H:%M:%S")
            );
        }

        Ok(match batch.end() {
            BatchEnd::WindowElapsed => None,
            BatchEnd::EndOfInput => Some(Termination::EndOfInput),
            BatchEnd::Cancelled => Some(Termination::Interrupted),
        })
    }

    async fn publish_with_retry(&mut self, batch: &SealedBatch) -> Result<()> {
        let mut retry_count = 0;
        loop {
            let err = match self.publisher.publish(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => ShipperError::Publish(e),
            };

            if err.is_retryable() && retry_count < self.max_retries {
                retry_count += 1;
                self.metrics.publish_retries += 1;
                let delay = self.retry_delay * retry_count;
                warn!(
                    "Publish failed: {}. Retrying in {:?} (attempt {}/{})",
                    err, delay, retry_count, self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            error!("Publish failed, giving up: {}", err);
            return Err(err);
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn session(&self) -> &Session {
        self.batcher.session()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn get_metrics(&self) -> &ShipMetrics {
        &self.metrics
    }
}
