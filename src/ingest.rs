//! Drives destination-table creation and the bulk load.
//!
//! The run goes CreateTable → BulkLoad, with one optional detour: when a
//! direct load fails and the source turns out not to be UTF-8, the file is
//! transcoded into a scoped temporary file and the load is retried exactly
//! once. The temporary file is removed before [`IngestionDriver::ingest`]
//! returns, whatever the outcome.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use encoding_rs::Encoding;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::{
    encoding::{self, DecodeErrors},
    error::{IngestError, Result, Stage, StoreError},
    io_utils::CsvFormat,
    reconcile::FileHeader,
    report, sql,
    schema::{ColumnType, WorkingSchema},
    store::Store,
};

const STAGING_SUFFIX: &str = "_stage";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStrategy {
    /// Load straight into the typed destination table.
    #[default]
    Direct,
    /// Load into an auto-typed staging table, then cast into the destination.
    StageThenCast,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::Direct => f.write_str("direct"),
            LoadStrategy::StageThenCast => f.write_str("stage-then-cast"),
        }
    }
}

impl FromStr for LoadStrategy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(LoadStrategy::Direct),
            "stage-then-cast" | "staged" => Ok(LoadStrategy::StageThenCast),
            other => Err(IngestError::Config(format!(
                "Unknown load strategy '{other}' (expected direct or stage-then-cast)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingDetection {
    /// Only inspect the encoding after a direct load has failed.
    #[default]
    OnFailure,
    /// Inspect before loading and transcode first when the file is not UTF-8.
    UpFront,
}

impl fmt::Display for EncodingDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingDetection::OnFailure => f.write_str("on-failure"),
            EncodingDetection::UpFront => f.write_str("up-front"),
        }
    }
}

impl FromStr for EncodingDetection {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on-failure" => Ok(EncodingDetection::OnFailure),
            "up-front" => Ok(EncodingDetection::UpFront),
            other => Err(IngestError::Config(format!(
                "Unknown encoding detection '{other}' (expected on-failure or up-front)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub format: CsvFormat,
    pub strategy: LoadStrategy,
    pub encoding_detection: EncodingDetection,
    pub sample_bytes: usize,
    /// Directory for transcoded copies; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            format: CsvFormat::default(),
            strategy: LoadStrategy::default(),
            encoding_detection: EncodingDetection::default(),
            sample_bytes: encoding::DEFAULT_SAMPLE_BYTES,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub rows_loaded: u64,
    /// Source encoding when the rows came from a transcoded copy.
    pub transcoded_from: Option<&'static str>,
    /// Staging columns with no destination column.
    pub unloaded_columns: Vec<String>,
    /// Destination columns the staged load filled with NULL.
    pub null_filled_columns: Vec<String>,
}

pub struct IngestionDriver<'a, S: Store + ?Sized> {
    store: &'a mut S,
    options: &'a IngestOptions,
}

impl<'a, S: Store + ?Sized> IngestionDriver<'a, S> {
    pub fn new(store: &'a mut S, options: &'a IngestOptions) -> Self {
        Self { store, options }
    }

    pub fn ingest(
        &mut self,
        schema: &WorkingSchema,
        header: &FileHeader,
        source: &Path,
        table: &str,
    ) -> Result<IngestOutcome> {
        self.create_table(schema, table)?;
        info!(
            "Loading {:?} into '{table}' ({} strategy)",
            source, self.options.strategy
        );
        let result = match self.options.strategy {
            LoadStrategy::Direct => {
                self.load_direct(schema, header, source, table)
                    .map(|outcome| IngestOutcome {
                        null_filled_columns: schema
                            .names()
                            .filter(|name| !header.contains(name))
                            .map(str::to_string)
                            .collect(),
                        ..outcome
                    })
            }
            LoadStrategy::StageThenCast => self.load_staged(schema, source, table),
        };
        match &result {
            Ok(outcome) => info!("Loaded {} row(s) into '{table}'", outcome.rows_loaded),
            Err(err) => error!(
                "Load into '{table}' failed: {err}. The table exists but holds no rows from this run"
            ),
        }
        result
    }

    fn create_table(&mut self, schema: &WorkingSchema, table: &str) -> Result<()> {
        let ddl = format!("{}\n{}", sql::drop_table(table)?, sql::create_table(table, schema)?);
        self.store
            .execute(&ddl)
            .map_err(|err| IngestError::load(Stage::CreateTable, err))?;
        info!("Created table '{table}' with {} column(s)", schema.len());
        Ok(())
    }

    fn load_direct(
        &mut self,
        schema: &WorkingSchema,
        header: &FileHeader,
        source: &Path,
        table: &str,
    ) -> Result<IngestOutcome> {
        let targets: Vec<Option<String>> = header
            .fields()
            .iter()
            .map(|field| field.clone().filter(|name| schema.contains(name)))
            .collect();

        if self.options.encoding_detection == EncodingDetection::UpFront {
            let (prepared, transcoded_from) = self.prepare_source(source)?;
            let path = prepared.as_deref().unwrap_or(source);
            let loaded = self.store.copy_into(table, &targets, path, &self.options.format);
            release(prepared);
            let rows_loaded = loaded.map_err(|err| IngestError::load(Stage::BulkLoad, err))?;
            return Ok(IngestOutcome {
                rows_loaded,
                transcoded_from,
                ..IngestOutcome::default()
            });
        }

        match self.store.copy_into(table, &targets, source, &self.options.format) {
            Ok(rows_loaded) => Ok(IngestOutcome {
                rows_loaded,
                ..IngestOutcome::default()
            }),
            Err(original) => self.recover(original, &targets, source, table),
        }
    }

    /// One transcode-and-retry attempt. Any failure surfaces the original error.
    fn recover(
        &mut self,
        original: StoreError,
        targets: &[Option<String>],
        source: &Path,
        table: &str,
    ) -> Result<IngestOutcome> {
        if original.is_encoding() {
            warn!("Bulk load of {:?} hit undecodable input ({original}); checking its encoding", source);
        } else {
            warn!(
                "Bulk load of {:?} failed ({original}); checking whether the encoding is the cause",
                source
            );
        }
        let detected = match encoding::detect_file(source, self.options.sample_bytes) {
            Ok(detected) => detected,
            Err(err) => {
                warn!("Could not sample {:?} for encoding detection: {err}", source);
                return Err(IngestError::load(Stage::BulkLoad, original));
            }
        };
        if encoding::is_utf8_compatible(detected) {
            info!("{:?} already looks like UTF-8; not retrying", source);
            return Err(IngestError::load(Stage::BulkLoad, original));
        }

        let temp = self.transcoded_copy(source, detected)?;
        info!("Retrying load of '{table}' from a UTF-8 copy of {:?}", source);
        let retried = self
            .store
            .copy_into(table, targets, &temp, &self.options.format);
        release(Some(temp));
        match retried {
            Ok(rows_loaded) => Ok(IngestOutcome {
                rows_loaded,
                transcoded_from: Some(detected.name()),
                ..IngestOutcome::default()
            }),
            Err(retry_err) => {
                warn!("Retry from transcoded copy failed as well: {retry_err}");
                Err(IngestError::load(Stage::BulkLoad, original))
            }
        }
    }

    /// Returns a transcoded copy of `source` when up-front detection finds a non-UTF-8 file.
    fn prepare_source(&self, source: &Path) -> Result<(Option<TempPath>, Option<&'static str>)> {
        let detected = encoding::detect_file(source, self.options.sample_bytes)?;
        if encoding::is_utf8_compatible(detected) {
            return Ok((None, None));
        }
        let temp = self.transcoded_copy(source, detected)?;
        Ok((Some(temp), Some(detected.name())))
    }

    fn transcoded_copy(&self, source: &Path, encoding: &'static Encoding) -> Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("census-ingest-").suffix(".csv");
        let file = match &self.options.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let temp = file.into_temp_path();
        // On error the TempPath drops here and removes the partial copy.
        encoding::transcode(source, &temp, encoding, DecodeErrors::Strict)?;
        Ok(temp)
    }

    fn load_staged(
        &mut self,
        schema: &WorkingSchema,
        source: &Path,
        table: &str,
    ) -> Result<IngestOutcome> {
        let (prepared, transcoded_from) =
            if self.options.encoding_detection == EncodingDetection::UpFront {
                self.prepare_source(source)?
            } else {
                (None, None)
            };
        let path = prepared.as_deref().unwrap_or(source);
        let staging = format!("{table}{STAGING_SUFFIX}");
        let result = self.stage_and_project(schema, path, table, &staging);
        release(prepared);
        if let Err(err) = sql::drop_table(&staging).and_then(|ddl| {
            self.store
                .execute(&ddl)
                .map_err(|err| IngestError::load(Stage::Staging, err))
        }) {
            warn!("Could not drop staging table '{staging}': {err}");
        }
        result.map(|outcome| IngestOutcome {
            transcoded_from,
            ..outcome
        })
    }

    fn stage_and_project(
        &mut self,
        schema: &WorkingSchema,
        source: &Path,
        table: &str,
        staging: &str,
    ) -> Result<IngestOutcome> {
        let staging_columns = self
            .store
            .stage_auto(staging, source, &self.options.format)
            .map_err(|err| IngestError::load(Stage::Staging, err))?;
        info!(
            "Staged {:?} into '{staging}' with {} column(s)",
            source,
            staging_columns.len()
        );
        let rows_loaded = report::count_rows(&mut *self.store, staging)
            .map_err(|err| IngestError::load(Stage::Staging, err))?;

        self.check_castable(schema, staging, &staging_columns)?;
        let projection = sql::project_staging(table, staging, schema, &staging_columns)?;
        for column in &projection.unloaded {
            warn!("Staging column '{column}' has no destination column in '{table}'; not loaded");
        }
        for column in &projection.null_filled {
            info!("Destination column '{column}' is absent from the file; loaded as NULL");
        }
        self.store
            .execute(&projection.statement)
            .map_err(|err| IngestError::load(Stage::Projection, err))?;

        Ok(IngestOutcome {
            rows_loaded,
            transcoded_from: None,
            unloaded_columns: projection.unloaded,
            null_filled_columns: projection.null_filled,
        })
    }

    /// Rejects the projection when a staged value would not survive its cast.
    fn check_castable(
        &mut self,
        schema: &WorkingSchema,
        staging: &str,
        staging_columns: &[String],
    ) -> Result<()> {
        for column in schema.columns() {
            if column.column_type == ColumnType::Text || !staging_columns.contains(&column.name) {
                continue;
            }
            let offending = self
                .store
                .first_unconvertible(staging, &column.name, column.column_type)
                .map_err(|err| IngestError::load(Stage::Projection, err))?;
            if let Some(value) = offending {
                return Err(IngestError::load(
                    Stage::Projection,
                    StoreError::Rejected(format!(
                        "staged value '{value}' of column '{}' cannot be converted to {}",
                        column.name, column.column_type
                    )),
                ));
            }
        }
        Ok(())
    }
}

fn release(temp: Option<TempPath>) {
    if let Some(temp) = temp {
        let path = temp.to_path_buf();
        if let Err(err) = temp.close() {
            warn!("Could not remove temporary file {:?}: {err}", path);
        }
    }
}
