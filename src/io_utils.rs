//! Delimited-file reader construction, header reading and decoding helpers.
//!
//! Everything that opens a delimited file goes through here so that the
//! delimiter, quote and escape conventions stay identical between header
//! reading, dictionary reading and the store's bulk load.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{IngestError, Result};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Layout of a delimited text file as understood by readers and the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: u8,
    pub has_headers: bool,
    /// Field values loaded as NULL, compared after trimming.
    pub null_tokens: Vec<String>,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b';',
            quote: b'"',
            escape: b'"',
            has_headers: true,
            null_tokens: vec!["".to_string(), "NA".to_string(), "NULL".to_string()],
        }
    }
}

impl CsvFormat {
    /// Fields match null tokens exactly; whitespace is data.
    pub fn is_null(&self, value: &str) -> bool {
        self.null_tokens.iter().any(|token| token == value)
    }

    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(self.has_headers)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .flexible(false);
        // The csv crate only honours a distinct escape byte with doubling disabled.
        if self.escape == self.quote {
            builder.double_quote(true).escape(None);
        } else {
            builder.double_quote(false).escape(Some(self.escape));
        }
        builder
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| IngestError::Config(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader_from_path(
    path: &Path,
    builder: &csv::ReaderBuilder,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(builder.from_reader(BufReader::new(file)))
}

/// Strictly decodes a field; `None` when the bytes are malformed for `encoding`.
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Option<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads and decodes the raw header row. The first field may carry a BOM.
pub fn read_raw_header<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> std::result::Result<Option<Vec<String>>, csv::Error>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    let mut decoded = match decode_record(&headers, encoding) {
        Some(values) => values,
        None => return Ok(None),
    };
    if let Some(first) = decoded.first_mut()
        && let Some(stripped) = first.strip_prefix('\u{feff}')
    {
        *first = stripped.to_string();
    }
    Ok(Some(decoded))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
