//! Destination table schema.
//!
//! A schema is written the way the store prints it: a comma separated list of
//! `name:type` pairs, where a name may be wrapped as `['name']` when it
//! collides with a query keyword. Names are stored unwrapped; the wrapper is
//! re-applied when the schema is rendered back into a management command.

pub mod mapping;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::SchemaError;

pub use mapping::{FieldMapping, MappingEntry};

/// Column list of the events table used when no schema is configured.
pub const DEFAULT_SCHEMA: &str = include_str!("events.csl");

const AMBIGUOUS_NAME_CHARS: &[char] = &['.', '[', ']', '\'', '"', ',', ':', '$', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Datetime,
    Decimal,
    Dynamic,
    Guid,
    Int,
    Long,
    Real,
    String,
    Timespan,
}

impl FromStr for ColumnType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "datetime" | "date" => Ok(ColumnType::Datetime),
            "decimal" => Ok(ColumnType::Decimal),
            "dynamic" => Ok(ColumnType::Dynamic),
            "guid" | "uniqueid" => Ok(ColumnType::Guid),
            "int" | "int32" => Ok(ColumnType::Int),
            "long" | "int64" => Ok(ColumnType::Long),
            "real" | "double" => Ok(ColumnType::Real),
            "string" => Ok(ColumnType::String),
            "timespan" | "time" => Ok(ColumnType::Timespan),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Datetime => "datetime",
            ColumnType::Decimal => "decimal",
            ColumnType::Dynamic => "dynamic",
            ColumnType::Guid => "guid",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Real => "real",
            ColumnType::String => "string",
            ColumnType::Timespan => "timespan",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    /// Parses one `name:type` spec, unwrapping `['name']` / `["name"]`.
    pub fn parse(spec: &str) -> Result<Self, SchemaError> {
        let spec = spec.trim();
        let (raw_name, raw_type) =
            spec.rsplit_once(':')
                .ok_or_else(|| SchemaError::MissingSeparator {
                    spec: spec.to_string(),
                })?;

        let name = unwrap_name(raw_name.trim());
        if name.is_empty() {
            return Err(SchemaError::EmptyName {
                spec: spec.to_string(),
            });
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || AMBIGUOUS_NAME_CHARS.contains(&c))
        {
            return Err(SchemaError::AmbiguousName {
                name: name.to_string(),
            });
        }

        let raw_type = raw_type.trim();
        let column_type = raw_type
            .parse::<ColumnType>()
            .map_err(|_| SchemaError::UnknownType {
                name: name.to_string(),
                type_name: raw_type.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            column_type,
        })
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "['{}']:{}", self.name, self.column_type)
    }
}

fn unwrap_name(raw: &str) -> &str {
    raw.strip_prefix("['")
        .and_then(|s| s.strip_suffix("']"))
        .or_else(|| raw.strip_prefix("[\"").and_then(|s| s.strip_suffix("\"]")))
        .unwrap_or(raw)
}

/// Ordered, duplicate-free list of destination columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
        }
        Ok(Self { columns })
    }

    /// The built-in events table schema.
    pub fn events() -> Result<Self, SchemaError> {
        DEFAULT_SCHEMA.parse()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Columns of `self` that `other` does not define, by name.
    pub fn missing_from<'a>(&'a self, other: &TableSchema) -> Vec<&'a Column> {
        self.columns
            .iter()
            .filter(|c| !other.contains(&c.name))
            .collect()
    }

    /// Renders the column list for a `.create` style management command.
    pub fn to_csl(&self) -> String {
        self.columns
            .iter()
            .map(Column::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for TableSchema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let columns = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Column::parse)
            .collect::<Result<Vec<_>, _>>()?;
        TableSchema::new(columns)
    }
}
