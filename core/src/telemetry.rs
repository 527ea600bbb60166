use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber. Output goes to stderr so that stdout only
/// carries what the operator asked for.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logship=info,logship_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ShipMetrics {
    pub lines_read: u64,
    pub records_accepted: u64,
    pub lines_dropped: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub batches_published: u64,
    pub empty_batches_skipped: u64,
    pub publish_retries: u64,
}
