//! SQLite-backed [`Store`] built on `rusqlite` with the bundled library.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, File},
    io::BufReader,
    path::Path,
};

use log::{debug, info};
use rusqlite::{
    Connection, params_from_iter,
    types::{Value, ValueRef},
};

use crate::{
    error::StoreError,
    io_utils::{self, CsvFormat},
    schema::ColumnType,
    sql,
    store::{Row, Store},
};

pub const DEFAULT_STAGE_SAMPLE_ROWS: usize = 2000;

pub struct SqliteStore {
    conn: Connection,
    stage_sample_rows: usize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened SQLite store at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            stage_sample_rows: DEFAULT_STAGE_SAMPLE_ROWS,
        }
    }

    /// Rows sampled when inferring a staging schema (0 scans the whole file).
    pub fn with_stage_sample_rows(mut self, rows: usize) -> Self {
        self.stage_sample_rows = rows;
        self
    }

    fn infer_staging_columns(
        &self,
        source: &Path,
        format: &CsvFormat,
    ) -> Result<Vec<(String, StagingType)>, StoreError> {
        let file = File::open(source)?;
        let mut reader = format.reader_builder().from_reader(BufReader::new(file));
        let header = if format.has_headers {
            io_utils::read_raw_header(&mut reader, encoding_rs::UTF_8)
                .map_err(|source_err| csv_error(source, source_err))?
                .ok_or(StoreError::InvalidUtf8 { line: 1 })?
        } else {
            let width = reader
                .byte_headers()
                .map_err(|source_err| csv_error(source, source_err))?
                .len();
            vec![String::new(); width]
        };
        let names = staging_names(&header);
        let mut candidates = vec![TypeCandidate::new(); names.len()];

        let mut record = csv::ByteRecord::new();
        let mut sampled = 0usize;
        while reader
            .read_byte_record(&mut record)
            .map_err(|source_err| csv_error(source, source_err))?
        {
            if self.stage_sample_rows > 0 && sampled >= self.stage_sample_rows {
                break;
            }
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            for (idx, field) in record.iter().enumerate().take(candidates.len()) {
                let value =
                    std::str::from_utf8(field).map_err(|_| StoreError::InvalidUtf8 { line })?;
                if !format.is_null(value) {
                    candidates[idx].update(value.trim());
                }
            }
            sampled += 1;
        }
        debug!("Sampled {sampled} row(s) of {:?} for staging types", source);

        Ok(names
            .into_iter()
            .zip(candidates.iter().map(TypeCandidate::decide))
            .collect())
    }
}

impl SqliteStore {
    fn declared_types(&mut self, table: &str) -> Result<HashMap<String, String>, StoreError> {
        let pragma = format!("PRAGMA table_info({});", ident(table)?);
        Ok(self
            .query(&pragma)?
            .into_iter()
            .filter_map(|row| {
                let mut row = row.into_iter().skip(1);
                let name = row.next().flatten()?;
                let declared = row.next().flatten().unwrap_or_default();
                Some((name, declared))
            })
            .collect())
    }
}

impl Store for SqliteStore {
    fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(render_value(row.get_ref(idx)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<String>>, StoreError> {
        let pragma = format!("PRAGMA table_info({});", ident(table)?);
        let columns: Vec<String> = self
            .query(&pragma)?
            .into_iter()
            .filter_map(|row| row.into_iter().nth(1).flatten())
            .collect();
        Ok(if columns.is_empty() { None } else { Some(columns) })
    }

    fn copy_into(
        &mut self,
        table: &str,
        targets: &[Option<String>],
        source: &Path,
        format: &CsvFormat,
    ) -> Result<u64, StoreError> {
        let bound: Vec<(usize, &str)> = targets
            .iter()
            .enumerate()
            .filter_map(|(idx, target)| target.as_deref().map(|name| (idx, name)))
            .collect();
        if bound.is_empty() {
            return Err(StoreError::Rejected(format!(
                "no columns of {source:?} map onto table '{table}'"
            )));
        }
        let column_list = bound
            .iter()
            .map(|(_, name)| ident(name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let declared = self.declared_types(table)?;
        let checks: Vec<FieldCheck> = bound
            .iter()
            .map(|(_, name)| {
                declared
                    .get(*name)
                    .map(|ty| FieldCheck::for_declared(ty))
                    .unwrap_or(FieldCheck::Any)
            })
            .collect();
        let placeholders = vec!["?"; bound.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders});",
            ident(table)?
        );

        let file = File::open(source)?;
        let mut reader = format.reader_builder().from_reader(BufReader::new(file));
        let tx = self.conn.transaction()?;
        let mut loaded = 0u64;
        {
            let mut stmt = tx.prepare(&insert)?;
            let mut record = csv::ByteRecord::new();
            while reader
                .read_byte_record(&mut record)
                .map_err(|source_err| csv_error(source, source_err))?
            {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                if record.len() != targets.len() {
                    return Err(StoreError::Rejected(format!(
                        "line {line}: expected {} field(s), found {}",
                        targets.len(),
                        record.len()
                    )));
                }
                let mut values: Vec<Value> = Vec::with_capacity(bound.len());
                for ((idx, name), check) in bound.iter().zip(&checks) {
                    let field = std::str::from_utf8(&record[*idx])
                        .map_err(|_| StoreError::InvalidUtf8 { line })?;
                    if format.is_null(field) {
                        values.push(Value::Null);
                        continue;
                    }
                    let value = check.convert(field).ok_or_else(|| {
                        StoreError::Rejected(format!(
                            "line {line}, column '{name}': '{field}' is not a valid {check}"
                        ))
                    })?;
                    values.push(value);
                }
                stmt.execute(params_from_iter(values.iter()))?;
                loaded += 1;
            }
        }
        tx.commit()?;
        debug!("Copied {loaded} row(s) from {:?} into '{table}'", source);
        Ok(loaded)
    }

    fn stage_auto(
        &mut self,
        staging: &str,
        source: &Path,
        format: &CsvFormat,
    ) -> Result<Vec<String>, StoreError> {
        let columns = self.infer_staging_columns(source, format)?;
        let definitions = columns
            .iter()
            .map(|(name, ty)| -> Result<String, StoreError> {
                Ok(format!("{} {}", ident(name)?, ty.sql_type()))
            })
            .collect::<Result<Vec<_>, StoreError>>()?
            .join(", ");
        let table = ident(staging)?;
        self.execute(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({definitions});"
        ))?;
        let names: Vec<String> = columns.into_iter().map(|(name, _)| name).collect();
        let targets: Vec<Option<String>> = names.iter().cloned().map(Some).collect();
        self.copy_into(staging, &targets, source, format)?;
        Ok(names)
    }

    fn first_unconvertible(
        &mut self,
        table: &str,
        column: &str,
        target: ColumnType,
    ) -> Result<Option<String>, StoreError> {
        let check = FieldCheck::for_declared(&target.sql_type());
        if check == FieldCheck::Any {
            return Ok(None);
        }
        let column = ident(column)?;
        let sql = format!(
            "SELECT {column} FROM {} WHERE typeof({column}) = 'text';",
            ident(table)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if let ValueRef::Text(bytes) = row.get_ref(0)? {
                let value = String::from_utf8_lossy(bytes);
                if check.convert(&value).is_none() {
                    return Ok(Some(value.into_owned()));
                }
            }
        }
        Ok(None)
    }

    fn set_threads(&mut self, threads: usize) -> Result<(), StoreError> {
        let applied: i64 =
            self.conn
                .pragma_update_and_check(None, "threads", threads as i64, |row| row.get(0))?;
        debug!("SQLite worker thread limit set to {applied}");
        Ok(())
    }
}

fn ident(name: &str) -> Result<String, StoreError> {
    sql::quote_ident(name).map_err(|err| StoreError::Rejected(err.to_string()))
}

fn csv_error(path: &Path, source: csv::Error) -> StoreError {
    StoreError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

fn render_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Value check applied to a field before it is bound to its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldCheck {
    Integer,
    Real,
    MaxChars(usize),
    Any,
}

impl FieldCheck {
    fn for_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("INT") {
            FieldCheck::Integer
        } else if ["DECIMAL", "NUMERIC", "DOUBLE", "REAL", "FLOAT"]
            .iter()
            .any(|prefix| upper.starts_with(prefix))
        {
            FieldCheck::Real
        } else if upper.starts_with("VARCHAR") || upper.starts_with("CHAR") {
            upper
                .split_once('(')
                .and_then(|(_, rest)| rest.strip_suffix(')'))
                .and_then(|length| length.trim().parse().ok())
                .map_or(FieldCheck::Any, FieldCheck::MaxChars)
        } else {
            FieldCheck::Any
        }
    }

    /// The value to bind, or `None` when `field` does not fit the column.
    fn convert(self, field: &str) -> Option<Value> {
        match self {
            FieldCheck::Integer => field.trim().parse::<i64>().ok().map(Value::Integer),
            FieldCheck::Real => field
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Value::Real),
            FieldCheck::MaxChars(limit) => {
                (field.chars().count() <= limit).then(|| Value::Text(field.to_string()))
            }
            FieldCheck::Any => Some(Value::Text(field.to_string())),
        }
    }
}

impl fmt::Display for FieldCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCheck::Integer => f.write_str("integer"),
            FieldCheck::Real => f.write_str("number"),
            FieldCheck::MaxChars(limit) => write!(f, "text of at most {limit} character(s)"),
            FieldCheck::Any => f.write_str("text"),
        }
    }
}

/// Names for staging columns: blanks get positional names, repeats a suffix.
fn staging_names(header: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let base = match raw.trim() {
                "" => format!("column{idx}"),
                name => name.to_string(),
            };
            let mut name = base.clone();
            let mut suffix = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            name
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagingType {
    BigInt,
    Double,
    Text,
}

impl StagingType {
    fn sql_type(self) -> &'static str {
        match self {
            StagingType::BigInt => "BIGINT",
            StagingType::Double => "DOUBLE",
            StagingType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    observed: bool,
    possible_integer: bool,
    possible_float: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            observed: false,
            possible_integer: true,
            possible_float: true,
        }
    }

    fn update(&mut self, value: &str) {
        self.observed = true;
        // Leading zeros mark codes, not quantities.
        let digits = value.strip_prefix('-').unwrap_or(value);
        if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
            self.possible_integer = false;
            self.possible_float = false;
            return;
        }
        if self.possible_integer && value.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float
            && (!value.bytes().any(|b| b.is_ascii_digit()) || value.parse::<f64>().is_err())
        {
            self.possible_float = false;
        }
    }

    fn decide(&self) -> StagingType {
        if !self.observed {
            StagingType::Text
        } else if self.possible_integer {
            StagingType::BigInt
        } else if self.possible_float {
            StagingType::Double
        } else {
            StagingType::Text
        }
    }
}
