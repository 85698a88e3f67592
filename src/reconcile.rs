//! Reconciles the dictionary's expected columns against the file header.
//!
//! Two policies are supported. [`ReconcilePolicy::ByDictionary`] builds the
//! schema from the dictionary and appends file-only columns as text, so the
//! destination table may carry columns the file never fills.
//! [`ReconcilePolicy::ByFile`] takes the file header verbatim, which keeps the
//! bulk load aligned column for column, and drops dictionary-only columns.
//!
//! Names are compared exactly after trimming; case is significant.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    dictionary::DictionaryEntry,
    error::{IngestError, Result},
    schema::{ColumnOrigin, ColumnType, ReconciliationReport, SchemaColumn, WorkingSchema},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    ByDictionary,
    #[default]
    ByFile,
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePolicy::ByDictionary => f.write_str("by-dictionary"),
            ReconcilePolicy::ByFile => f.write_str("by-file"),
        }
    }
}

impl FromStr for ReconcilePolicy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "by-dictionary" | "dictionary" => Ok(ReconcilePolicy::ByDictionary),
            "by-file" | "file" => Ok(ReconcilePolicy::ByFile),
            other => Err(IngestError::Config(format!(
                "Unknown reconcile policy '{other}' (expected by-dictionary or by-file)"
            ))),
        }
    }
}

/// Names that stand for "no value" in a dirty dictionary or header: blank,
/// `nan`, or punctuation only (`---`, `*`).
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.eq_ignore_ascii_case("nan") || !trimmed.chars().any(char::is_alphanumeric)
}

/// The source file's header row, one slot per field position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    fields: Vec<Option<String>>,
}

impl FileHeader {
    /// Trims tokens and blanks out placeholder positions. Duplicates are rejected.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for (idx, token) in tokens.into_iter().enumerate() {
            let token = token.as_ref();
            if is_placeholder_name(token) {
                warn!("Ignoring blank header column at position {idx}: '{token}'");
                fields.push(None);
                continue;
            }
            let name = token.trim().to_string();
            if !seen.insert(name.clone()) {
                return Err(IngestError::Schema(format!(
                    "duplicate column '{name}' in file header (position {idx})"
                )));
            }
            fields.push(Some(name));
        }
        if seen.is_empty() {
            return Err(IngestError::Schema("file header is empty".to_string()));
        }
        Ok(Self { fields })
    }

    /// Field slots in file order; `None` marks an ignored position.
    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| f.as_deref())
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns().any(|c| c == name)
    }

    pub fn ignored_positions(&self) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }
}

pub fn reconcile(
    entries: &[DictionaryEntry],
    header: &FileHeader,
    policy: ReconcilePolicy,
) -> Result<(WorkingSchema, ReconciliationReport)> {
    let dictionary = valid_entries(entries);
    if dictionary.is_empty() {
        return Err(IngestError::Schema(
            "dictionary yields no valid variable names".to_string(),
        ));
    }
    debug!(
        "Reconciling {} dictionary variable(s) against {} header column(s) ({policy})",
        dictionary.len(),
        header.columns().count()
    );

    let types: HashMap<&str, ColumnType> = dictionary
        .iter()
        .map(|(name, column_type)| (name.as_str(), *column_type))
        .collect();
    let lookup = |name: &str| types.get(name).copied();

    let mut report = ReconciliationReport {
        ignored_header_positions: header.ignored_positions(),
        ..ReconciliationReport::default()
    };
    let mut columns = Vec::new();

    match policy {
        ReconcilePolicy::ByDictionary => {
            for (name, column_type) in &dictionary {
                columns.push(SchemaColumn {
                    name: name.clone(),
                    column_type: *column_type,
                    origin: ColumnOrigin::Dictionary,
                });
            }
            for name in header.columns() {
                if lookup(name).is_none() {
                    warn!("File column '{name}' is not in the dictionary; added as TEXT");
                    report.extra_columns.push(name.to_string());
                    columns.push(SchemaColumn {
                        name: name.to_string(),
                        column_type: ColumnType::Text,
                        origin: ColumnOrigin::FileOnly,
                    });
                }
            }
        }
        ReconcilePolicy::ByFile => {
            for name in header.columns() {
                let (column_type, origin) = match lookup(name) {
                    Some(column_type) => (column_type, ColumnOrigin::Dictionary),
                    None => {
                        info!("File column '{name}' is not in the dictionary; using TEXT");
                        report.untyped_columns.push(name.to_string());
                        (ColumnType::Text, ColumnOrigin::FileOnly)
                    }
                };
                columns.push(SchemaColumn {
                    name: name.to_string(),
                    column_type,
                    origin,
                });
            }
        }
    }

    for (name, _) in &dictionary {
        if !header.contains(name) {
            warn!("Dictionary column '{name}' is missing from the file");
            report.missing_columns.push(name.clone());
        }
    }

    let schema = WorkingSchema::new(columns)?;
    info!(
        "Working schema has {} column(s): {} extra, {} missing",
        schema.len(),
        report.extra_columns.len(),
        report.missing_columns.len()
    );
    Ok((schema, report))
}

/// Dictionary names with their inferred types, placeholders and repeats removed.
fn valid_entries(entries: &[DictionaryEntry]) -> Vec<(String, ColumnType)> {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(entries.len());
    for entry in entries {
        if is_placeholder_name(&entry.name) {
            continue;
        }
        let name = entry.name.trim().to_string();
        if !seen.insert(name.clone()) {
            warn!("Dictionary lists '{name}' more than once; keeping the first entry");
            continue;
        }
        valid.push((name, entry.column_type()));
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DecimalSpec;

    fn census_dictionary() -> Vec<DictionaryEntry> {
        vec![
            DictionaryEntry::new("ID", "num", "9"),
            DictionaryEntry::new("NOME", "char", "60"),
            DictionaryEntry::new("NOTA", "num", "5,2"),
        ]
    }

    fn header(tokens: &[&str]) -> FileHeader {
        FileHeader::from_tokens(tokens).expect("header")
    }

    #[test]
    fn by_dictionary_appends_extra_columns_as_text() {
        let (schema, report) = reconcile(
            &census_dictionary(),
            &header(&["ID", "NOME", "NOTA", "EXTRA_COL"]),
            ReconcilePolicy::ByDictionary,
        )
        .expect("reconcile");
        let columns: Vec<_> = schema
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), c.column_type))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("ID", ColumnType::bigint()),
                ("NOME", ColumnType::FixedText(60)),
                ("NOTA", ColumnType::Decimal(DecimalSpec::new(5, 2))),
                ("EXTRA_COL", ColumnType::Text),
            ]
        );
        assert_eq!(report.extra_columns, vec!["EXTRA_COL"]);
        assert!(report.missing_columns.is_empty());
    }

    #[test]
    fn by_dictionary_keeps_missing_columns_in_schema() {
        let (schema, report) = reconcile(
            &census_dictionary(),
            &header(&["ID", "NOME"]),
            ReconcilePolicy::ByDictionary,
        )
        .expect("reconcile");
        assert!(schema.contains("NOTA"));
        assert_eq!(report.missing_columns, vec!["NOTA"]);
    }

    #[test]
    fn by_file_follows_header_order() {
        let (schema, report) = reconcile(
            &census_dictionary(),
            &header(&["NOME", "EXTRA_COL", "ID"]),
            ReconcilePolicy::ByFile,
        )
        .expect("reconcile");
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            vec!["NOME", "EXTRA_COL", "ID"]
        );
        assert_eq!(schema.column_type("EXTRA_COL"), Some(ColumnType::Text));
        assert!(report.extra_columns.is_empty());
        assert_eq!(report.untyped_columns, vec!["EXTRA_COL"]);
        assert_eq!(report.missing_columns, vec!["NOTA"]);
        assert!(!schema.contains("NOTA"));
    }

    #[test]
    fn placeholder_dictionary_rows_are_dropped() {
        let mut entries = census_dictionary();
        entries.insert(0, DictionaryEntry::new("nan", "nan", ""));
        entries.push(DictionaryEntry::new("   ", "num", "3"));
        entries.push(DictionaryEntry::new("---", "char", "1"));
        let (schema, _) = reconcile(&entries, &header(&["ID"]), ReconcilePolicy::ByDictionary)
            .expect("reconcile");
        assert_eq!(schema.len(), 3);
        assert!(!schema.contains("nan"));
        assert!(!schema.contains("---"));
    }

    #[test]
    fn punctuation_only_header_tokens_are_ignored() {
        let header = header(&["ID", "---", "NOME", "*"]);
        assert_eq!(header.ignored_positions(), vec![1, 3]);
        assert_eq!(header.columns().collect::<Vec<_>>(), vec!["ID", "NOME"]);
        assert!(is_placeholder_name(" -- "));
        assert!(!is_placeholder_name("NU_ANO"));
    }

    #[test]
    fn case_differences_are_distinct_columns() {
        let (_, report) = reconcile(
            &census_dictionary(),
            &header(&["id", "NOME", "NOTA"]),
            ReconcilePolicy::ByDictionary,
        )
        .expect("reconcile");
        assert_eq!(report.extra_columns, vec!["id"]);
        assert_eq!(report.missing_columns, vec!["ID"]);
    }

    #[test]
    fn blank_header_positions_are_ignored() {
        let header = header(&[" ID ", "", "NOME", "nan"]);
        assert_eq!(header.ignored_positions(), vec![1, 3]);
        assert_eq!(header.width(), 4);
        let (schema, report) =
            reconcile(&census_dictionary(), &header, ReconcilePolicy::ByFile).expect("reconcile");
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["ID", "NOME"]);
        assert_eq!(report.ignored_header_positions, vec![1, 3]);
    }

    #[test]
    fn duplicate_header_columns_are_rejected() {
        let err = FileHeader::from_tokens(["ID", "NOME", "ID "]).unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
    }

    #[test]
    fn empty_inputs_are_schema_errors() {
        assert!(FileHeader::from_tokens(["", " "]).is_err());
        let err = reconcile(
            &[DictionaryEntry::new("nan", "num", "")],
            &header(&["ID"]),
            ReconcilePolicy::ByFile,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no valid variable names"));
    }
}
