use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    config::LoadConfig,
    encoding::DecodeErrors,
    ingest::{EncodingDetection, LoadStrategy},
    reconcile::ReconcilePolicy,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load census microdata CSV files into a typed SQL table",
    long_about = None
)]
pub struct Cli {
    /// Append log output to this file as well as stderr
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the dictionary with the file header and load the rows into the database
    Load(LoadArgs),
    /// Show the reconciled schema and findings without touching the database
    Plan(PlanArgs),
    /// Transcode a CSV file to UTF-8
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Census microdata CSV file
    #[arg(long = "csv", default_value = "./data/microdados.csv")]
    pub csv: PathBuf,
    /// Data dictionary CSV file
    #[arg(long = "dict", default_value = "./data/dicionario.csv")]
    pub dict: PathBuf,
    /// YAML configuration file; flags below override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Which side fixes the column set and order (by-dictionary or by-file)
    #[arg(long)]
    pub policy: Option<ReconcilePolicy>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the CSV file header (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Values treated as NULL; repeat to supply several
    #[arg(long = "null-token", action = clap::ArgAction::Append)]
    pub null_tokens: Vec<String>,
    /// Dictionary delimiter (inferred from the file extension when omitted)
    #[arg(long = "dict-delimiter", value_parser = parse_delimiter)]
    pub dict_delimiter: Option<u8>,
    /// Character encoding of the dictionary file
    #[arg(long = "dict-encoding")]
    pub dict_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// SQLite database file
    #[arg(long = "db", default_value = "./db/censo_escolar.sqlite")]
    pub db: PathBuf,
    /// Destination table name
    #[arg(short, long)]
    pub table: Option<String>,
    /// Table receiving the dictionary type assignments
    #[arg(long = "meta-table")]
    pub meta_table: Option<String>,
    /// Load path: direct or stage-then-cast
    #[arg(long)]
    pub strategy: Option<LoadStrategy>,
    /// When to inspect the source encoding: on-failure or up-front
    #[arg(long = "encoding-detection")]
    pub encoding_detection: Option<EncodingDetection>,
    /// Worker thread hint passed to the database
    #[arg(long)]
    pub threads: Option<usize>,
    /// Directory for transcoded temporary copies
    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,
    /// Write the load summary as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// File to transcode
    pub input: PathBuf,
    /// Destination file (defaults to `<stem>_utf8.<ext>` next to the input)
    #[arg(conflicts_with = "output_flag")]
    pub output: Option<PathBuf>,
    #[arg(short = 'o', long = "output", id = "output_flag", hide = true)]
    pub output_flag: Option<PathBuf>,
    /// Source encoding; detected from a sample when omitted
    #[arg(long)]
    pub encoding: Option<String>,
    /// Undecodable bytes: strict fails, replace substitutes U+FFFD
    #[arg(long, default_value = "strict")]
    pub errors: DecodeErrors,
    /// Bytes sampled for encoding detection
    #[arg(long = "sample-bytes", default_value_t = crate::encoding::DEFAULT_SAMPLE_BYTES)]
    pub sample_bytes: usize,
}

impl ConvertArgs {
    pub fn output(&self) -> Option<&PathBuf> {
        self.output.as_ref().or(self.output_flag.as_ref())
    }
}

impl SourceArgs {
    pub fn apply_to(&self, config: &mut LoadConfig) {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = char::from(delimiter).to_string();
        }
        if let Some(encoding) = &self.input_encoding {
            config.input_encoding = Some(encoding.clone());
        }
        if !self.null_tokens.is_empty() {
            config.null_tokens = self.null_tokens.clone();
        }
        if let Some(delimiter) = self.dict_delimiter {
            config.dictionary.delimiter = Some(char::from(delimiter).to_string());
        }
        if let Some(encoding) = &self.dict_encoding {
            config.dictionary.encoding = Some(encoding.clone());
        }
    }
}

impl LoadArgs {
    pub fn apply_to(&self, config: &mut LoadConfig) {
        self.source.apply_to(config);
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(meta_table) = &self.meta_table {
            config.meta_table = meta_table.clone();
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(detection) = self.encoding_detection {
            config.encoding_detection = detection;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = Some(dir.clone());
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
