//! Post-load validation: row and column counts plus reconciliation findings.

use std::{borrow::Cow, fmt, fmt::Write as _, time::Duration};

use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;

use crate::{
    error::{IngestError, Result, Stage, StoreError},
    ingest::IngestOutcome,
    schema::ReconciliationReport,
    sql,
    store::Store,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub table: String,
    pub row_count: u64,
    pub column_count: usize,
    pub extra_columns: Vec<String>,
    pub missing_columns: Vec<String>,
    pub untyped_columns: Vec<String>,
    pub unloaded_columns: Vec<String>,
    /// Destination columns the file could not populate.
    pub null_filled_columns: Vec<String>,
    pub ignored_header_positions: Vec<usize>,
    pub transcoded_from: Option<String>,
    pub elapsed_secs: f64,
}

impl LoadSummary {
    pub fn with_outcome(mut self, outcome: &IngestOutcome) -> Self {
        self.unloaded_columns = outcome.unloaded_columns.clone();
        self.null_filled_columns = outcome.null_filled_columns.clone();
        self.transcoded_from = outcome.transcoded_from.map(str::to_string);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_secs = elapsed.as_secs_f64();
        self
    }

    pub fn render(&self) -> String {
        let rows = vec![
            row("Table", self.table.clone()),
            row("Rows loaded", self.row_count.to_string()),
            row("Columns", self.column_count.to_string()),
            row("Extra columns (file only)", list(&self.extra_columns)),
            row("Missing columns (dictionary only)", list(&self.missing_columns)),
            row("Columns typed as TEXT", list(&self.untyped_columns)),
            row("Staging columns not loaded", list(&self.unloaded_columns)),
            row("Columns left NULL", list(&self.null_filled_columns)),
            row(
                "Ignored header positions",
                list(&self.ignored_header_positions),
            ),
            row(
                "Transcoded from",
                self.transcoded_from.clone().unwrap_or_else(|| "-".to_string()),
            ),
            row("Elapsed", format!("{:.2}s", self.elapsed_secs)),
        ];
        render_table(&["Load summary".to_string(), String::new()], &rows)
    }

    pub fn log(&self) {
        info!("Total rows: {}", self.row_count);
        info!("Column count: {}", self.column_count);
        info!("Extra columns: {:?}", self.extra_columns);
        info!("Missing columns: {:?}", self.missing_columns);
        if !self.unloaded_columns.is_empty() {
            warn!(
                "Staging columns dropped during projection: {:?}",
                self.unloaded_columns
            );
        }
        if !self.null_filled_columns.is_empty() {
            info!("Columns left NULL by this file: {:?}", self.null_filled_columns);
        }
        info!("Elapsed: {:.2} seconds", self.elapsed_secs);
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Reads counts for `table` and pairs them with the reconciliation findings.
pub fn report<S: Store + ?Sized>(
    store: &mut S,
    table: &str,
    reconciliation: &ReconciliationReport,
) -> Result<LoadSummary> {
    let columns = store
        .table_columns(table)
        .map_err(|err| IngestError::load(Stage::Report, err))?
        .ok_or_else(|| IngestError::NotFound(table.to_string()))?;
    let row_count =
        count_rows(store, table).map_err(|err| IngestError::load(Stage::Report, err))?;
    if row_count == 0 {
        warn!("Table '{table}' holds no rows after the load");
    }
    Ok(LoadSummary {
        table: table.to_string(),
        row_count,
        column_count: columns.len(),
        extra_columns: reconciliation.extra_columns.clone(),
        missing_columns: reconciliation.missing_columns.clone(),
        untyped_columns: reconciliation.untyped_columns.clone(),
        ignored_header_positions: reconciliation.ignored_header_positions.clone(),
        ..LoadSummary::default()
    })
}

pub(crate) fn count_rows<S: Store + ?Sized>(store: &mut S, table: &str) -> Result<u64, StoreError> {
    let statement =
        sql::count_rows(table).map_err(|err| StoreError::Rejected(err.to_string()))?;
    let rows = store.query(&statement)?;
    rows.first()
        .and_then(|row| row.first())
        .and_then(|value| value.as_deref())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| StoreError::Rejected(format!("row count of '{table}' is not a number")))
}

fn row(label: &str, value: String) -> Vec<String> {
    vec![label.to_string(), value]
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.iter().join(", ")
    }
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separators = widths.iter().map(|w| "-".repeat((*w).max(3))).collect::<Vec<_>>();
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separators, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (value, width) in values.iter().zip(widths) {
        let sanitized = sanitize_cell(value);
        let padding = width.saturating_sub(display_width(&sanitized));
        cells.push(format!("{sanitized}{}", " ".repeat(padding)));
    }
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_table_aligns_columns() {
        let rendered = render_table(
            &["name".to_string(), "n".to_string()],
            &[
                vec!["ID".to_string(), "10".to_string()],
                vec!["NOME\tX".to_string(), "2".to_string()],
            ],
        );
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "name    n");
        assert_eq!(lines[1], "------  ---");
        assert_eq!(lines[2], "ID      10");
        assert_eq!(lines[3], "NOME X  2");
    }

    #[test]
    fn summary_lists_findings() {
        let summary = LoadSummary {
            table: "censo".to_string(),
            row_count: 3,
            column_count: 4,
            extra_columns: vec!["EXTRA_COL".to_string()],
            ..LoadSummary::default()
        };
        let rendered = summary.render();
        assert!(rendered.contains("Extra columns (file only)"));
        assert!(rendered.contains("EXTRA_COL"));
        assert!(rendered.contains("Rows loaded"));
    }

    #[test]
    fn outcome_columns_reach_summary() {
        let outcome = IngestOutcome {
            rows_loaded: 2,
            transcoded_from: Some("windows-1252"),
            unloaded_columns: vec!["column2".to_string()],
            null_filled_columns: vec!["NOTA".to_string()],
        };
        let summary = LoadSummary::default().with_outcome(&outcome);
        assert_eq!(summary.null_filled_columns, vec!["NOTA"]);
        assert_eq!(summary.transcoded_from.as_deref(), Some("windows-1252"));
        let rendered = summary.render();
        assert!(rendered.contains("Columns left NULL"));
        assert!(rendered.contains("column2"));
    }
}
