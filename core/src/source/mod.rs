pub mod lines;

use chrono::{DateTime, Utc};

pub use lines::LineBatcher;

/// Why a batch stopped accepting lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEnd {
    /// The collection window elapsed.
    WindowElapsed,
    /// The input stream closed. No further batches will have records.
    EndOfInput,
    /// Shutdown was requested while the batch was open.
    Cancelled,
}

/// A closed batch: gzip-compressed newline-delimited JSON records.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    pub(crate) payload: Vec<u8>,
    pub(crate) records: usize,
    pub(crate) lines_read: u64,
    pub(crate) lines_dropped: u64,
    pub(crate) raw_bytes: u64,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) end: BatchEnd,
}

impl SealedBatch {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Size of the serialized records before compression.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn end(&self) -> BatchEnd {
        self.end
    }
}

/// Cheap pre-filter applied before parsing: after trimming trailing
/// whitespace the line must open and close like a JSON object.
pub fn is_object_candidate(line: &str) -> bool {
    let line = line.trim_end();
    line.starts_with('{') && line.ends_with('}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_object_candidate() {
        assert!(is_object_candidate(r#"{"a":1}"#));
        assert!(is_object_candidate("{\"a\":1}  \r"));
        assert!(is_object_candidate("{}"));
        assert!(!is_object_candidate("not json"));
        assert!(!is_object_candidate(r#"  {"a":1}"#));
        assert!(!is_object_candidate(r#"{"a":1"#));
        assert!(!is_object_candidate("[1,2]"));
        assert!(!is_object_candidate(""));
    }
}
