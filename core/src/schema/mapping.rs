use serde::Serialize;

use super::TableSchema;

/// Where one destination column is read from inside a raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub column: String,
    pub path: String,
}

/// JSON ingestion mapping, one entry per schema column in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: Vec<MappingEntry>,
}

impl FieldMapping {
    /// Compiles the mapping for `schema`. Each column is read from the
    /// top-level record key of the same name.
    pub fn compile(schema: &TableSchema) -> Self {
        let entries = schema
            .columns()
            .iter()
            .map(|column| MappingEntry {
                column: column.name.clone(),
                path: format!("$.{}", column.name),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The mapping document as sent in a `.create-or-alter ... mapping` command.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
