use std::io::{ErrorKind, Write};
use std::time::Duration;

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{InputError, Result, SerializationError};
use crate::session::Session;
use crate::source::{BatchEnd, SealedBatch, is_object_candidate};

/// Cuts a line stream into time-windowed, compressed batches of tagged
/// records.
///
/// A batch closes when the window has elapsed, checked after every accepted
/// line and whenever the input goes idle, or when the input ends, or when
/// the cancellation token fires. A line that is already in flight is always
/// written in full before the batch closes.
pub struct LineBatcher<R> {
    lines: Lines<R>,
    session: Session,
    window: Duration,
    compression: Compression,
}

impl<R> LineBatcher<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, session: Session, window: Duration) -> Self {
        Self {
            lines: reader.lines(),
            session,
            window,
            compression: Compression::default(),
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Collects lines until the batch closes, then seals it.
    ///
    /// Malformed lines are dropped without error. Only a failing read of the
    /// underlying stream is reported.
    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> Result<SealedBatch> {
        let start = Instant::now();
        let deadline = start + self.window;
        let mut batch = OpenBatch::new(self.compression);

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break BatchEnd::Cancelled,
                line = self.lines.next_line() => line,
                _ = tokio::time::sleep_until(deadline) => break BatchEnd::WindowElapsed,
            };

            match next {
                Ok(Some(line)) => {
                    if batch.push_line(&line, &self.session)? && start.elapsed() >= self.window {
                        break BatchEnd::WindowElapsed;
                    }
                }
                Ok(None) => break BatchEnd::EndOfInput,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    trace!("Dropping line that is not valid UTF-8");
                    batch.lines_read += 1;
                    batch.lines_dropped += 1;
                }
                Err(e) => return Err(InputError::Read(e).into()),
            }
        };

        let sealed = batch.seal(end)?;
        debug!(
            "Sealed batch: {} records, {} raw bytes, {} compressed bytes, end={:?}",
            sealed.records(),
            sealed.raw_bytes(),
            sealed.compressed_bytes(),
            sealed.end()
        );
        Ok(sealed)
    }
}

struct OpenBatch {
    encoder: GzEncoder<Vec<u8>>,
    records: usize,
    lines_read: u64,
    lines_dropped: u64,
    raw_bytes: u64,
    started_at: chrono::DateTime<Utc>,
}

impl OpenBatch {
    fn new(compression: Compression) -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), compression),
            records: 0,
            lines_read: 0,
            lines_dropped: 0,
            raw_bytes: 0,
            started_at: Utc::now(),
        }
    }

    /// Returns whether the line was accepted into the batch.
    fn push_line(&mut self, line: &str, session: &Session) -> Result<bool> {
        self.lines_read += 1;

        let line = line.trim_end();
        if !is_object_candidate(line) {
            self.lines_dropped += 1;
            return Ok(false);
        }
        let record = match session.tag(line) {
            Ok(record) => record,
            Err(e) => {
                trace!("Dropping malformed record: {}", e);
                self.lines_dropped += 1;
                return Ok(false);
            }
        };

        let mut serialized = serde_json::to_vec(&record)?;
        serialized.push(b'\n');
        self.encoder
            .write_all(&serialized)
            .map_err(|e| SerializationError::Compression {
                reason: e.to_string(),
            })?;

        self.records += 1;
        self.raw_bytes += serialized.len() as u64;
        Ok(true)
    }

    fn seal(self, end: BatchEnd) -> Result<SealedBatch> {
        let payload = self
            .encoder
            .finish()
            .map_err(|e| SerializationError::Compression {
                reason: e.to_string(),
            })?;

        Ok(SealedBatch {
            payload,
            records: self.records,
            lines_read: self.lines_read,
            lines_dropped: self.lines_dropped,
            raw_bytes: self.raw_bytes,
            started_at: self.started_at,
            end,
        })
    }
}
