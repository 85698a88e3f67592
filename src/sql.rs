//! SQL text rendering with strict identifier quoting.
//!
//! Table and column names come from the dictionary and the file header, so
//! every identifier is validated and double-quoted before it reaches DDL or
//! DML text. Literal values go through [`quote_literal`].

use itertools::Itertools;

use crate::{
    error::{IngestError, Result},
    schema::WorkingSchema,
};

pub fn quote_ident(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(IngestError::Schema("empty SQL identifier".to_string()));
    }
    if let Some(bad) = name.chars().find(|c| c.is_control()) {
        return Err(IngestError::Schema(format!(
            "identifier {name:?} contains control character U+{:04X}",
            bad as u32
        )));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn drop_table(table: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {};", quote_ident(table)?))
}

pub fn create_table(table: &str, schema: &WorkingSchema) -> Result<String> {
    let columns = schema
        .columns()
        .iter()
        .map(|column| -> Result<String> {
            Ok(format!("  {} {}", quote_ident(&column.name)?, column.column_type))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(table)?,
        columns.join(",\n")
    ))
}

pub fn count_rows(table: &str) -> Result<String> {
    Ok(format!("SELECT COUNT(*) FROM {};", quote_ident(table)?))
}

/// Casts staging columns into the destination's declared column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub statement: String,
    /// Staging columns with no destination counterpart.
    pub unloaded: Vec<String>,
    /// Destination columns filled with a typed NULL.
    pub null_filled: Vec<String>,
}

pub fn project_staging(
    destination: &str,
    staging: &str,
    schema: &WorkingSchema,
    staging_columns: &[String],
) -> Result<Projection> {
    let mut select = Vec::with_capacity(schema.len());
    let mut null_filled = Vec::new();
    for column in schema.columns() {
        let ident = quote_ident(&column.name)?;
        let expr = if !staging_columns.contains(&column.name) {
            null_filled.push(column.name.clone());
            format!("CAST(NULL AS {}) AS {ident}", column.column_type)
        } else if column.column_type.is_numeric() {
            format!("CAST({ident} AS {}) AS {ident}", column.column_type)
        } else {
            ident
        };
        select.push(expr);
    }
    let unloaded = staging_columns
        .iter()
        .filter(|name| !schema.contains(name))
        .cloned()
        .collect();
    let statement = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {};",
        quote_ident(destination)?,
        schema.names().map(quote_ident).collect::<Result<Vec<_>>>()?.join(", "),
        select.iter().join(", "),
        quote_ident(staging)?
    );
    Ok(Projection {
        statement,
        unloaded,
        null_filled,
    })
}
