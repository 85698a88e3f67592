pub mod cli;
pub mod config;
pub mod dictionary;
pub mod encoding;
pub mod error;
pub mod infer;
pub mod ingest;
pub mod io_utils;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod sql;
pub mod sqlite;
pub mod store;

use std::{
    env,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, ConvertArgs, LoadArgs, PlanArgs, SourceArgs},
    config::LoadConfig,
    io_utils::printable_delimiter,
    report::render_table,
    schema::ColumnOrigin,
    sqlite::SqliteStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

/// Copies every log line to stderr and the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Creating log directory {parent:?}"))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {path:?}"))?;
            Some(file)
        }
        None => None,
    };
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("census_ingest", LevelFilter::Info);
        }
        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Convert(args) => handle_convert(&args),
    }
}

fn build_config(source: &SourceArgs) -> Result<LoadConfig> {
    let config = match &source.config {
        Some(path) => LoadConfig::load(path)?,
        None => LoadConfig::default(),
    };
    Ok(config)
}

fn handle_load(args: &LoadArgs) -> Result<()> {
    let mut config = build_config(&args.source)?;
    args.apply_to(&mut config);
    config.validate()?;
    let format = config.csv_format()?;
    info!(
        "Loading '{}' with delimiter '{}' into {:?}",
        args.source.csv.display(),
        printable_delimiter(format.delimiter),
        args.db
    );

    let mut store = SqliteStore::open(&args.db)
        .with_context(|| format!("Opening database {:?}", args.db))?
        .with_stage_sample_rows(config.stage_sample_rows);
    let summary = pipeline::load(&mut store, &args.source.csv, &args.source.dict, &config)
        .with_context(|| format!("Loading {:?} into table '{}'", args.source.csv, config.table))?;

    print!("{summary}");
    if let Some(path) = &args.summary_json {
        let file =
            File::create(path).with_context(|| format!("Creating summary file {path:?}"))?;
        serde_json::to_writer_pretty(file, &summary)
            .with_context(|| format!("Writing summary to {path:?}"))?;
        info!("Load summary written to {:?}", path);
    }
    Ok(())
}

fn handle_plan(args: &PlanArgs) -> Result<()> {
    let mut config = build_config(&args.source)?;
    args.source.apply_to(&mut config);
    config.validate()?;
    let plan = pipeline::plan(&args.source.csv, &args.source.dict, &config)
        .with_context(|| format!("Reconciling {:?} with {:?}", args.source.csv, args.source.dict))?;

    let headers = ["#", "column", "type", "origin"].map(String::from);
    let rows = plan
        .schema
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            vec![
                (idx + 1).to_string(),
                column.name.clone(),
                column.column_type.to_string(),
                match column.origin {
                    ColumnOrigin::Dictionary => "dictionary".to_string(),
                    ColumnOrigin::FileOnly => "file only".to_string(),
                },
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", render_table(&headers, &rows));

    let findings = &plan.reconciliation;
    println!();
    println!("Policy: {}", config.policy);
    println!("Extra columns: {:?}", findings.extra_columns);
    println!("Missing columns: {:?}", findings.missing_columns);
    println!("Columns typed as TEXT: {:?}", findings.untyped_columns);
    if !findings.ignored_header_positions.is_empty() {
        println!(
            "Ignored header positions: {:?}",
            findings.ignored_header_positions
        );
    }
    Ok(())
}

fn handle_convert(args: &ConvertArgs) -> Result<()> {
    if !args.input.is_file() {
        return Err(anyhow!("Input file {:?} does not exist", args.input));
    }
    let output = args
        .output()
        .cloned()
        .unwrap_or_else(|| default_convert_output(&args.input));
    if output == args.input {
        return Err(anyhow!("Output must differ from input {:?}", args.input));
    }
    let encoding = match &args.encoding {
        Some(label) => io_utils::resolve_encoding(Some(label))?,
        None => {
            let detected = encoding::detect_file(&args.input, args.sample_bytes)
                .with_context(|| format!("Detecting encoding of {:?}", args.input))?;
            info!("Detected encoding {} for {:?}", detected.name(), args.input);
            detected
        }
    };
    let stats = encoding::transcode(&args.input, &output, encoding, args.errors)
        .with_context(|| format!("Converting {:?} to UTF-8", args.input))?;
    if stats.replacements {
        log::warn!("Some bytes of {:?} could not be decoded and were replaced", args.input);
    }
    println!(
        "{} ({}) -> {} ({} byte(s))",
        args.input.display(),
        encoding.name(),
        output.display(),
        stats.bytes_written
    );
    Ok(())
}

/// `<stem>_utf8.<ext>` beside the input.
pub fn default_convert_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_utf8.{}", ext.to_string_lossy()),
        None => format!("{stem}_utf8"),
    };
    input.with_file_name(name)
}
