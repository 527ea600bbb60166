mod args;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logship_core::sink::KustoClient;
use logship_core::telemetry::init_tracing;
use logship_core::{Ingestor, Session, ShipperError, Termination};

use crate::args::Cli;

/// Entry point for shipping a local process's logs, e.g.
/// `my-service | logship --table myEvents`.
///
/// What it does at a high-level:
///     Load config and make sure the destination table and mapping exist.
///     Main loop runs until stdin closes or Ctrl-C is pressed:
///         - collect stdin lines for one window into a compressed batch
///         - stream the batch into the table
#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(termination) => {
            info!("Finished: {:?}", termination);
            0
        }
        Err(e) => {
            let phase = e
                .downcast_ref::<ShipperError>()
                .map(ShipperError::phase)
                .unwrap_or("startup");
            error!("{} failed: {:#}", phase, e);
            1
        }
    };

    // Exit directly: a pending blocking read on stdin would otherwise keep
    // the runtime from shutting down.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<Termination> {
    let config = cli.into_config()?;
    config.validate()?;

    let client = Arc::new(
        KustoClient::new(&config.cluster, config.processing.request_timeout())
            .map_err(ShipperError::from)
            .context("Failed to create Kusto client")?,
    );
    let session = Session::new(config.destination.tag_key.clone());
    let stdin = BufReader::new(tokio::io::stdin());
    let mut ingestor = Ingestor::new(&config, session, stdin, client.clone(), client)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Interrupt received, sending the current batch before exiting");
        trigger.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting without sending");
            std::process::exit(130);
        }
    });

    ingestor.provision().await?;
    info!(
        "Sending json output to Kusto. Uri={} Table={}",
        config.cluster.uri,
        ingestor.destination().table
    );
    println!(
        "{}",
        ingestor.session().query_hint(&ingestor.destination().table)
    );

    Ok(ingestor.run_steady(&cancel).await?)
}
