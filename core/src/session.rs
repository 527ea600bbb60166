use serde_json::{Map, Value};
use uuid::Uuid;

pub type Record = Map<String, Value>;

/// Identity of one shipper run. Every record sent during the run carries
/// `tag_key: id` so the run can be isolated in the shared table later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: Uuid,
    tag_key: String,
}

impl Session {
    /// Starts a session with a fresh random (v4) identifier.
    pub fn new(tag_key: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), tag_key)
    }

    pub fn with_id(id: Uuid, tag_key: impl Into<String>) -> Self {
        Self {
            id,
            tag_key: tag_key.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tag_key(&self) -> &str {
        &self.tag_key
    }

    /// Parses `line` as a JSON object and sets the session key on it.
    ///
    /// An existing value under the session key is replaced. Key order of
    /// the input is preserved and the session key is always last. Numbers
    /// keep their original text.
    pub fn tag(&self, line: &str) -> serde_json::Result<Record> {
        let mut record: Record = serde_json::from_str(line)?;
        record.shift_remove(&self.tag_key);
        record.insert(self.tag_key.clone(), Value::String(self.id.to_string()));
        Ok(record)
    }

    /// Query that returns this run's records, newest first.
    pub fn query_hint(&self, table: &str) -> String {
        format!(
            "['{}'] | where {} == \"{}\" | order by ['time'] desc",
            table, self.tag_key, self.id
        )
    }
}
