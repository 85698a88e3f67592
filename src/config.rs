//! Run configuration: YAML file defaults overridden by command-line flags.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    cli::parse_delimiter,
    dictionary::{self, DictionaryLayout},
    encoding::DEFAULT_SAMPLE_BYTES,
    error::{IngestError, Result},
    ingest::{EncodingDetection, IngestOptions, LoadStrategy},
    io_utils::{self, CsvFormat},
    reconcile::ReconcilePolicy,
    sqlite::DEFAULT_STAGE_SAMPLE_ROWS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub delimiter: String,
    pub quote: String,
    pub escape: String,
    pub has_headers: bool,
    pub null_tokens: Vec<String>,
    pub input_encoding: Option<String>,
    pub policy: ReconcilePolicy,
    pub strategy: LoadStrategy,
    pub encoding_detection: EncodingDetection,
    pub sample_bytes: usize,
    pub stage_sample_rows: usize,
    pub threads: usize,
    pub table: String,
    pub meta_table: String,
    pub temp_dir: Option<PathBuf>,
    pub dictionary: DictionaryConfig,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            delimiter: ";".to_string(),
            quote: "\"".to_string(),
            escape: "\"".to_string(),
            has_headers: true,
            null_tokens: CsvFormat::default().null_tokens,
            input_encoding: None,
            policy: ReconcilePolicy::default(),
            strategy: LoadStrategy::default(),
            encoding_detection: EncodingDetection::default(),
            sample_bytes: DEFAULT_SAMPLE_BYTES,
            stage_sample_rows: DEFAULT_STAGE_SAMPLE_ROWS,
            threads: 4,
            table: "censo".to_string(),
            meta_table: "_meta".to_string(),
            temp_dir: None,
            dictionary: DictionaryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DictionaryConfig {
    /// Field delimiter; inferred from the file extension when unset.
    pub delimiter: Option<String>,
    pub encoding: Option<String>,
    pub name_column: String,
    pub type_column: String,
    pub size_column: String,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: None,
            name_column: dictionary::DEFAULT_NAME_COLUMN.to_string(),
            type_column: dictionary::DEFAULT_TYPE_COLUMN.to_string(),
            size_column: dictionary::DEFAULT_SIZE_COLUMN.to_string(),
        }
    }
}

impl LoadConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| IngestError::Config(format!("opening config {path:?}: {err}")))?;
        let config: LoadConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| IngestError::Config(format!("parsing config {path:?}: {err}")))?;
        debug!("Loaded configuration from {:?}: {config:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() || self.meta_table.trim().is_empty() {
            return Err(IngestError::Config("table names cannot be empty".to_string()));
        }
        if self.table == self.meta_table {
            return Err(IngestError::Config(format!(
                "destination and metadata tables are both '{}'",
                self.table
            )));
        }
        if self.threads == 0 {
            return Err(IngestError::Config("threads must be at least 1".to_string()));
        }
        if self.sample_bytes == 0 {
            return Err(IngestError::Config("sample_bytes must be positive".to_string()));
        }
        self.csv_format().map(|_| ())
    }

    pub fn csv_format(&self) -> Result<CsvFormat> {
        Ok(CsvFormat {
            delimiter: parse_delimiter(&self.delimiter)
                .map_err(|err| IngestError::Config(format!("delimiter: {err}")))?,
            quote: parse_byte("quote", &self.quote)?,
            escape: parse_byte("escape", &self.escape)?,
            has_headers: self.has_headers,
            null_tokens: self.null_tokens.clone(),
        })
    }

    pub fn ingest_options(&self) -> Result<IngestOptions> {
        Ok(IngestOptions {
            format: self.csv_format()?,
            strategy: self.strategy,
            encoding_detection: self.encoding_detection,
            sample_bytes: self.sample_bytes,
            temp_dir: self.temp_dir.clone(),
        })
    }

    pub fn dictionary_layout(&self, path: &Path) -> Result<DictionaryLayout> {
        let delimiter = self
            .dictionary
            .delimiter
            .as_deref()
            .map(parse_delimiter)
            .transpose()
            .map_err(|err| IngestError::Config(format!("dictionary delimiter: {err}")))?;
        let encoding = io_utils::resolve_encoding(self.dictionary.encoding.as_deref())?;
        let mut layout = DictionaryLayout::for_path(path, delimiter, encoding);
        layout.name_column = self.dictionary.name_column.clone();
        layout.type_column = self.dictionary.type_column.clone();
        layout.size_column = self.dictionary.size_column.clone();
        Ok(layout)
    }
}

fn parse_byte(label: &str, value: &str) -> Result<u8> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if ch.is_ascii() => Ok(ch as u8),
        _ => Err(IngestError::Config(format!(
            "{label} must be a single ASCII character, got '{value}'"
        ))),
    }
}
