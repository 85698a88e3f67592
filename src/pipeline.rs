//! End-to-end load run: dictionary → reconciliation → ingestion → report.

use std::{path::Path, time::Instant};

use chrono::{SecondsFormat, Utc};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    config::LoadConfig,
    dictionary::{self, DictionaryEntry},
    encoding,
    error::{IngestError, Result, Stage},
    ingest::IngestionDriver,
    io_utils::{self, CsvFormat},
    reconcile::{self, FileHeader, is_placeholder_name},
    report::{self, LoadSummary},
    schema::{ReconciliationReport, WorkingSchema},
    sql,
    store::Store,
};

const META_INSERT_BATCH: usize = 500;

/// Reconciled inputs of a run, before anything touches the store.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub entries: Vec<DictionaryEntry>,
    pub header: FileHeader,
    pub schema: WorkingSchema,
    pub reconciliation: ReconciliationReport,
}

pub fn plan(source: &Path, dictionary_path: &Path, config: &LoadConfig) -> Result<LoadPlan> {
    let layout = config.dictionary_layout(dictionary_path)?;
    let entries = dictionary::read_dictionary(dictionary_path, &layout)?;
    let header = read_file_header(
        source,
        &config.csv_format()?,
        config.input_encoding.as_deref(),
        config.sample_bytes,
    )?;
    info!(
        "Header of {:?} has {} column(s): {}{}",
        source,
        header.width(),
        header.columns().take(10).join(", "),
        if header.width() > 10 { ", ..." } else { "" }
    );
    let (schema, reconciliation) = reconcile::reconcile(&entries, &header, config.policy)?;
    Ok(LoadPlan {
        entries,
        header,
        schema,
        reconciliation,
    })
}

pub fn load<S: Store + ?Sized>(
    store: &mut S,
    source: &Path,
    dictionary_path: &Path,
    config: &LoadConfig,
) -> Result<LoadSummary> {
    let started = Instant::now();
    info!("Starting census load of {:?} into '{}'", source, config.table);
    config.validate()?;
    let plan = plan(source, dictionary_path, config)?;

    if let Err(err) = store.set_threads(config.threads) {
        warn!("Store ignored thread hint {}: {err}", config.threads);
    }
    let options = config.ingest_options()?;
    let outcome = IngestionDriver::new(&mut *store, &options).ingest(
        &plan.schema,
        &plan.header,
        source,
        &config.table,
    )?;

    write_metadata(store, &config.meta_table, &plan.entries, &plan.header)?;

    let summary = report::report(store, &config.table, &plan.reconciliation)?
        .with_outcome(&outcome)
        .with_elapsed(started.elapsed());
    summary.log();
    Ok(summary)
}

/// Reads the source header, falling back to the detected encoding when the
/// configured one cannot decode it.
pub fn read_file_header(
    path: &Path,
    format: &CsvFormat,
    encoding_label: Option<&str>,
    sample_bytes: usize,
) -> Result<FileHeader> {
    let encoding = io_utils::resolve_encoding(encoding_label)?;
    let mut reader = io_utils::open_csv_reader_from_path(path, &format.reader_builder())?;
    let read = |reader: &mut csv::Reader<_>, encoding| {
        io_utils::read_raw_header(reader, encoding).map_err(|err| {
            IngestError::Schema(format!("reading header of {path:?}: {err}"))
        })
    };
    if let Some(tokens) = read(&mut reader, encoding)? {
        return FileHeader::from_tokens(tokens);
    }

    let detected = encoding::detect_file(path, sample_bytes)?;
    if detected == encoding {
        return Err(IngestError::Encoding {
            path: path.to_path_buf(),
            message: format!("header is not valid {}", encoding.name()),
        });
    }
    warn!(
        "Header of {:?} is not valid {}; decoding it as {}",
        path,
        encoding.name(),
        detected.name()
    );
    let mut reader = io_utils::open_csv_reader_from_path(path, &format.reader_builder())?;
    match read(&mut reader, detected)? {
        Some(tokens) => FileHeader::from_tokens(tokens),
        None => Err(IngestError::Encoding {
            path: path.to_path_buf(),
            message: format!("header is not valid {} either", detected.name()),
        }),
    }
}

/// Records the dictionary-derived type of every valid variable for auditing.
pub fn write_metadata<S: Store + ?Sized>(
    store: &mut S,
    table: &str,
    entries: &[DictionaryEntry],
    header: &FileHeader,
) -> Result<()> {
    let recorded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let ident = sql::quote_ident(table)?;
    let mut statements = vec![
        sql::drop_table(table)?,
        format!(
            "CREATE TABLE {ident} (variable TEXT, declared_type TEXT, declared_size TEXT, \
             inferred_type TEXT, in_file INTEGER, recorded_at TEXT);"
        ),
    ];
    let rows: Vec<String> = entries
        .iter()
        .filter(|entry| !is_placeholder_name(&entry.name))
        .map(|entry| {
            format!(
                "({}, {}, {}, {}, {}, {})",
                sql::quote_literal(&entry.name),
                sql::quote_literal(&entry.type_token),
                sql::quote_literal(&entry.declared_size),
                sql::quote_literal(&entry.column_type().sql_type()),
                u8::from(header.contains(&entry.name)),
                sql::quote_literal(&recorded_at)
            )
        })
        .collect();
    for chunk in rows.chunks(META_INSERT_BATCH) {
        statements.push(format!("INSERT INTO {ident} VALUES {};", chunk.join(", ")));
    }
    store
        .execute(&statements.join("\n"))
        .map_err(|err| IngestError::load(Stage::Metadata, err))?;
    info!("Wrote {} dictionary type assignment(s) to '{table}'", rows.len());
    Ok(())
}
