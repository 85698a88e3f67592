//! The narrow table-store interface the ingestion core drives.
//!
//! The core never talks to a database directly: table creation, bulk loads
//! and the reporting queries all go through [`Store`]. A single caller owns
//! the store for the whole run.

use std::path::Path;

use crate::{error::StoreError, io_utils::CsvFormat, schema::ColumnType};

/// One result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

pub trait Store {
    /// Runs one or more statements that return no rows.
    fn execute(&mut self, sql: &str) -> Result<(), StoreError>;

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// Column names of `table` in declared order, or `None` if it does not exist.
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<String>>, StoreError>;

    /// Bulk-loads `source` into an existing `table`, all or nothing.
    ///
    /// `targets` has one slot per field of the file; field `i` is written to
    /// column `targets[i]`, or skipped when the slot is `None`. Fields equal to
    /// one of the format's null tokens load as NULL. Returns the rows written.
    fn copy_into(
        &mut self,
        table: &str,
        targets: &[Option<String>],
        source: &Path,
        format: &CsvFormat,
    ) -> Result<u64, StoreError>;

    /// Creates `staging` from a schema inferred from `source` and loads the
    /// file into it. Returns the staging column names in file order.
    fn stage_auto(
        &mut self,
        staging: &str,
        source: &Path,
        format: &CsvFormat,
    ) -> Result<Vec<String>, StoreError>;

    /// First text value of `column` in `table` that `target` cannot hold, if any.
    /// Used before casting staged columns, where a lossy cast would go unnoticed.
    fn first_unconvertible(
        &mut self,
        table: &str,
        column: &str,
        target: ColumnType,
    ) -> Result<Option<String>, StoreError>;

    /// Hint for the store's internal parallelism.
    fn set_threads(&mut self, threads: usize) -> Result<(), StoreError>;
}
