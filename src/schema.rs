//! Column types and the reconciled working schema.
//!
//! A [`WorkingSchema`] is built once per run by the reconciler and is never
//! mutated afterwards; reconciliation findings live beside it in a separate
//! [`ReconciliationReport`].

use std::{collections::HashMap, fmt};

use serde::{Serialize, Serializer};

use crate::error::{IngestError, Result};

/// Bit width used for every integer column the dictionary can produce.
pub const INTEGER_BITS: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalSpec {
    pub fn new(precision: u32, scale: u32) -> Self {
        Self { precision, scale }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Signed integer of the given bit width.
    Integer(u8),
    Decimal(DecimalSpec),
    Double,
    /// Text with a declared maximum length.
    FixedText(u32),
    Text,
}

impl ColumnType {
    pub const fn bigint() -> Self {
        ColumnType::Integer(INTEGER_BITS)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer(_) | ColumnType::Decimal(_) | ColumnType::Double
        )
    }

    /// SQL spelling used in DDL and casts.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Integer(bits) if *bits <= 16 => "SMALLINT".to_string(),
            ColumnType::Integer(bits) if *bits <= 32 => "INTEGER".to_string(),
            ColumnType::Integer(_) => "BIGINT".to_string(),
            ColumnType::Decimal(spec) => format!("DECIMAL({},{})", spec.precision, spec.scale),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::FixedText(len) => format!("VARCHAR({len})"),
            ColumnType::Text => "TEXT".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_type())
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.sql_type())
    }
}

/// Where a working-schema column's type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnOrigin {
    Dictionary,
    /// Present in the file only; typed as text.
    FileOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub origin: ColumnOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingSchema {
    columns: Vec<SchemaColumn>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl WorkingSchema {
    pub fn new(columns: Vec<SchemaColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(IngestError::Schema(
                "working schema must contain at least one column".to_string(),
            ));
        }
        let mut positions = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if positions.insert(column.name.clone(), idx).is_some() {
                return Err(IngestError::Schema(format!(
                    "duplicate column '{}' in working schema",
                    column.name
                )));
            }
        }
        Ok(Self { columns, positions })
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&SchemaColumn> {
        self.positions.get(name).map(|&idx| &self.columns[idx])
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.get(name).map(|c| c.column_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }
}

/// Findings of reconciling the dictionary against the file header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// In the file, absent from the dictionary (dictionary-driven policy only).
    pub extra_columns: Vec<String>,
    /// In the dictionary, absent from the file.
    pub missing_columns: Vec<String>,
    /// File columns defaulted to text under the file-driven policy.
    pub untyped_columns: Vec<String>,
    /// Zero-based header positions with a blank name; never loaded.
    pub ignored_header_positions: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, column_type: ColumnType) -> SchemaColumn {
        SchemaColumn {
            name: name.to_string(),
            column_type,
            origin: ColumnOrigin::Dictionary,
        }
    }

    #[test]
    fn sql_types_render_declared_sizes() {
        assert_eq!(ColumnType::bigint().sql_type(), "BIGINT");
        assert_eq!(
            ColumnType::Decimal(DecimalSpec::new(5, 2)).sql_type(),
            "DECIMAL(5,2)"
        );
        assert_eq!(ColumnType::FixedText(60).sql_type(), "VARCHAR(60)");
        assert_eq!(ColumnType::Text.to_string(), "TEXT");
    }

    #[test]
    fn numeric_kinds() {
        assert!(ColumnType::Double.is_numeric());
        assert!(ColumnType::Decimal(DecimalSpec::new(10, 2)).is_numeric());
        assert!(!ColumnType::FixedText(4).is_numeric());
    }

    #[test]
    fn schema_rejects_duplicates() {
        let err = WorkingSchema::new(vec![
            column("ID", ColumnType::bigint()),
            column("ID", ColumnType::Text),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column 'ID'"));
    }

    #[test]
    fn schema_lookup_preserves_order() {
        let schema = WorkingSchema::new(vec![
            column("B", ColumnType::Text),
            column("A", ColumnType::Double),
        ])
        .expect("schema");
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["B", "A"]);
        assert_eq!(schema.column_type("A"), Some(ColumnType::Double));
        assert!(!schema.contains("a"));
    }
}
