//! Reads the data dictionary from a delimited export of its sheet.
//!
//! Rows are yielded as-is, placeholder names included; deciding which rows
//! describe real variables is the reconciler's job.

use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    error::{IngestError, Result},
    infer::{self, DeclaredType},
    io_utils,
    schema::ColumnType,
};

pub const DEFAULT_NAME_COLUMN: &str = "Nome da Variável";
pub const DEFAULT_TYPE_COLUMN: &str = "Tipo de Dado";
pub const DEFAULT_SIZE_COLUMN: &str = "Tamanho";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub name: String,
    pub declared_type: DeclaredType,
    /// Declared type token as written in the dictionary.
    pub type_token: String,
    pub declared_size: String,
}

impl DictionaryEntry {
    pub fn new(name: &str, type_token: &str, declared_size: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            declared_type: DeclaredType::parse(type_token),
            type_token: type_token.trim().to_string(),
            declared_size: declared_size.trim().to_string(),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        infer::infer_declared(self.declared_type, &self.declared_size)
    }
}

#[derive(Debug, Clone)]
pub struct DictionaryLayout {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    pub name_column: String,
    pub type_column: String,
    pub size_column: String,
}

impl DictionaryLayout {
    pub fn for_path(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Self {
        Self {
            delimiter: io_utils::resolve_input_delimiter(path, delimiter),
            encoding,
            name_column: DEFAULT_NAME_COLUMN.to_string(),
            type_column: DEFAULT_TYPE_COLUMN.to_string(),
            size_column: DEFAULT_SIZE_COLUMN.to_string(),
        }
    }
}

pub fn read_dictionary(path: &Path, layout: &DictionaryLayout) -> Result<Vec<DictionaryEntry>> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(layout.delimiter)
        .double_quote(true)
        .flexible(true);
    let mut reader = io_utils::open_csv_reader_from_path(path, &builder).map_err(|err| {
        IngestError::Dictionary(format!("opening dictionary {path:?}: {err}"))
    })?;
    let headers = io_utils::read_raw_header(&mut reader, layout.encoding)
        .map_err(|err| IngestError::Dictionary(format!("reading header of {path:?}: {err}")))?
        .ok_or_else(|| {
            IngestError::Dictionary(format!(
                "header of {path:?} is not valid {}",
                layout.encoding.name()
            ))
        })?;
    debug!("Dictionary header: {headers:?}");

    let name_idx = locate(&headers, &layout.name_column, path)?;
    let type_idx = locate(&headers, &layout.type_column, path)?;
    let size_idx = locate(&headers, &layout.size_column, path)?;

    let mut entries = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut row = 1usize;
    loop {
        row += 1;
        let more = reader.read_byte_record(&mut record).map_err(|err| {
            IngestError::Dictionary(format!("reading row {row} of {path:?}: {err}"))
        })?;
        if !more {
            break;
        }
        let fields = io_utils::decode_record(&record, layout.encoding).ok_or_else(|| {
            IngestError::Dictionary(format!(
                "row {row} of {path:?} is not valid {}",
                layout.encoding.name()
            ))
        })?;
        let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");
        entries.push(DictionaryEntry::new(
            field(name_idx),
            field(type_idx),
            field(size_idx),
        ));
    }

    if entries.is_empty() {
        return Err(IngestError::Dictionary(format!(
            "dictionary {path:?} has no rows"
        )));
    }
    info!("Read {} dictionary row(s) from {:?}", entries.len(), path);
    Ok(entries)
}

fn locate(headers: &[String], label: &str, path: &Path) -> Result<usize> {
    let wanted = label.trim().to_lowercase();
    headers
        .iter()
        .position(|header| header.trim().to_lowercase() == wanted)
        .ok_or_else(|| {
            IngestError::Dictionary(format!(
                "dictionary {path:?} has no '{label}' column (found: {})",
                headers.join(", ")
            ))
        })
}
