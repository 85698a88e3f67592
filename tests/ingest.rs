mod common;

use std::fs;

use census_ingest::{
    config::LoadConfig,
    error::{IngestError, Stage, StoreError},
    ingest::{EncodingDetection, LoadStrategy},
    pipeline,
    reconcile::ReconcilePolicy,
    report,
    schema::ReconciliationReport,
    sqlite::SqliteStore,
    store::Store,
};
use common::{TestWorkspace, latin1};

fn by_dictionary() -> LoadConfig {
    LoadConfig {
        policy: ReconcilePolicy::ByDictionary,
        ..LoadConfig::default()
    }
}

fn values(store: &mut SqliteStore, sql: &str) -> Vec<Vec<String>> {
    store
        .query(sql)
        .expect("query")
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|value| value.unwrap_or_else(|| "NULL".to_string()))
                .collect()
        })
        .collect()
}

fn declared_types(store: &mut SqliteStore, table: &str) -> Vec<(String, String)> {
    values(store, &format!("PRAGMA table_info(\"{table}\")"))
        .into_iter()
        .map(|row| (row[1].clone(), row[2].clone()))
        .collect()
}

#[test]
fn extra_file_column_is_loaded_as_text() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write(
        "microdados.csv",
        "ID;NOME;NOTA;EXTRA_COL\n1;Ana;7.5;x\n2;Bia;NA;y\n",
    );
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &by_dictionary()).expect("load");

    assert_eq!(summary.row_count, 2);
    assert_eq!(summary.column_count, 4);
    assert_eq!(summary.extra_columns, vec!["EXTRA_COL"]);
    assert!(summary.missing_columns.is_empty());
    assert_eq!(
        declared_types(&mut store, "censo"),
        vec![
            ("ID".to_string(), "BIGINT".to_string()),
            ("NOME".to_string(), "VARCHAR(60)".to_string()),
            ("NOTA".to_string(), "DECIMAL(5,2)".to_string()),
            ("EXTRA_COL".to_string(), "TEXT".to_string()),
        ]
    );
    assert_eq!(
        values(&mut store, "SELECT ID, NOME, NOTA, EXTRA_COL FROM censo ORDER BY ID"),
        vec![vec!["1", "Ana", "7.5", "x"], vec!["2", "Bia", "NULL", "y"]]
    );
}

#[test]
fn missing_dictionary_column_is_all_null() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME\n1;Ana\n2;Bia\n");
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &by_dictionary()).expect("load");

    assert_eq!(summary.missing_columns, vec!["NOTA"]);
    assert_eq!(summary.column_count, 3);
    assert_eq!(
        values(&mut store, "SELECT COUNT(*), COUNT(NOTA) FROM censo"),
        vec![vec!["2", "0"]]
    );
    assert_eq!(
        values(
            &mut store,
            "SELECT variable, inferred_type, in_file FROM _meta ORDER BY rowid"
        ),
        vec![
            vec!["ID", "BIGINT", "1"],
            vec!["NOME", "VARCHAR(60)", "1"],
            vec!["NOTA", "DECIMAL(5,2)", "0"],
        ]
    );
}

#[test]
fn by_file_policy_follows_header_order() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "NOME;NOVA;ID\nAna;a;1\n");
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &LoadConfig::default()).expect("load");

    assert_eq!(summary.untyped_columns, vec!["NOVA"]);
    assert_eq!(summary.missing_columns, vec!["NOTA"]);
    let names: Vec<_> = declared_types(&mut store, "censo")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["NOME", "NOVA", "ID"]);
}

#[test]
fn reloading_replaces_previous_rows() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;NOTA\n1;Ana;7.5\n2;Bia;8\n");
    let db = ws.path().join("db").join("censo.sqlite");
    let config = by_dictionary();

    for _ in 0..2 {
        let mut store = SqliteStore::open(&db).expect("store");
        let summary = pipeline::load(&mut store, &csv, &dict, &config).expect("load");
        assert_eq!(summary.row_count, 2);
    }
    let mut store = SqliteStore::open(&db).expect("store");
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["2"]]);
}

#[test]
fn latin1_source_is_transcoded_and_retried() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write_bytes(
        "microdados.csv",
        &latin1("ID;NOME;NOTA\n1;São Paulo;7.5\n2;Brasília;6\n"),
    );
    let temp_dir = ws.dir("tmp");
    let config = LoadConfig {
        temp_dir: Some(temp_dir.clone()),
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &config).expect("load");

    assert_eq!(summary.row_count, 2);
    assert_eq!(summary.transcoded_from.as_deref(), Some("windows-1252"));
    assert_eq!(
        values(&mut store, "SELECT NOME FROM censo ORDER BY ID"),
        vec![vec!["São Paulo"], vec!["Brasília"]]
    );
    assert_eq!(fs::read_dir(&temp_dir).expect("temp dir").count(), 0);
}

#[test]
fn utf8_source_failure_is_not_retried() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME\n1;Ana\n2;Bia;sobra\n");
    let temp_dir = ws.dir("tmp");
    let config = LoadConfig {
        temp_dir: Some(temp_dir.clone()),
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &config).unwrap_err();

    assert!(
        matches!(
            err,
            IngestError::Load {
                stage: Stage::BulkLoad,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["0"]]);
    assert_eq!(fs::read_dir(&temp_dir).expect("temp dir").count(), 0);
}

#[test]
fn failed_retry_from_transcoded_copy_surfaces_original_error() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write_bytes(
        "microdados.csv",
        &latin1("ID;NOME\n1;São Paulo\n2;Bia;sobra\n"),
    );
    let temp_dir = ws.dir("tmp");
    let config = LoadConfig {
        temp_dir: Some(temp_dir.clone()),
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &config).unwrap_err();

    assert!(
        matches!(
            err,
            IngestError::Load {
                stage: Stage::BulkLoad,
                source: StoreError::InvalidUtf8 { .. },
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["0"]]);
    assert_eq!(fs::read_dir(&temp_dir).expect("temp dir").count(), 0);
}

#[test]
fn direct_load_rejects_values_that_do_not_fit_column_types() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;NOTA\n1;Ana;7.5\nA1;Bia;x7\n");
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &by_dictionary()).unwrap_err();

    match &err {
        IngestError::Load {
            stage: Stage::BulkLoad,
            source: StoreError::Rejected(message),
        } => {
            assert!(message.contains("line 3"), "message was: {message}");
            assert!(message.contains("'ID'"), "message was: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["0"]]);
}

#[test]
fn direct_load_rejects_text_longer_than_declared() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let long_name = "X".repeat(61);
    let csv = ws.write("microdados.csv", &format!("ID;NOME\n1;{long_name}\n"));
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &by_dictionary()).unwrap_err();

    assert!(err.to_string().contains("'NOME'"), "unexpected error: {err}");
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["0"]]);
}

#[test]
fn direct_load_stores_numbers_with_numeric_storage_class() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;NOTA\n1;   ;7.5\n");
    let mut store = SqliteStore::open_in_memory().expect("store");

    pipeline::load(&mut store, &csv, &dict, &by_dictionary()).expect("load");

    assert_eq!(
        values(
            &mut store,
            "SELECT typeof(ID), typeof(NOTA), NOME IS NULL, length(NOME) FROM censo"
        ),
        vec![vec!["integer", "real", "0", "3"]]
    );
}

#[test]
fn stage_then_cast_rejects_values_that_would_be_zeroed() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;NOTA\nA1;Ana;x7\n2;Bia;8\n");
    let config = LoadConfig {
        strategy: LoadStrategy::StageThenCast,
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &config).unwrap_err();

    assert!(
        matches!(
            err,
            IngestError::Load {
                stage: Stage::Projection,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("'A1'"), "unexpected error: {err}");
    assert_eq!(values(&mut store, "SELECT COUNT(*) FROM censo"), vec![vec!["0"]]);
    assert_eq!(store.table_columns("censo_stage").expect("pragma"), None);
}

#[test]
fn stage_then_cast_converts_zero_padded_codes() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;NOTA\n007;Ana;7.5\n012;Bia;NA\n");
    let config = LoadConfig {
        strategy: LoadStrategy::StageThenCast,
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    pipeline::load(&mut store, &csv, &dict, &config).expect("load");

    assert_eq!(
        values(&mut store, "SELECT ID, typeof(ID) FROM censo ORDER BY ID"),
        vec![vec!["7", "integer"], vec!["12", "integer"]]
    );
}

#[test]
fn stage_then_cast_projects_typed_columns() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;;NOTA\n1;Ana;q;7.5\n2;Bia;r;NA\n");
    let config = LoadConfig {
        strategy: LoadStrategy::StageThenCast,
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &config).expect("load");

    assert_eq!(summary.row_count, 2);
    assert_eq!(summary.ignored_header_positions, vec![2]);
    assert_eq!(summary.unloaded_columns, vec!["column2"]);
    assert_eq!(
        values(&mut store, "SELECT ID, NOME, NOTA FROM censo ORDER BY ID"),
        vec![vec!["1", "Ana", "7.5"], vec!["2", "Bia", "NULL"]]
    );
    assert_eq!(store.table_columns("censo_stage").expect("pragma"), None);
}

#[test]
fn up_front_detection_transcodes_before_staging() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write_bytes("microdados.csv", &latin1("ID;NOME\n1;Goiânia\n2;São Luís\n"));
    let config = LoadConfig {
        strategy: LoadStrategy::StageThenCast,
        encoding_detection: EncodingDetection::UpFront,
        temp_dir: Some(ws.dir("tmp")),
        ..by_dictionary()
    };
    let mut store = SqliteStore::open_in_memory().expect("store");

    let summary = pipeline::load(&mut store, &csv, &dict, &config).expect("load");

    assert_eq!(summary.transcoded_from.as_deref(), Some("windows-1252"));
    assert_eq!(
        values(&mut store, "SELECT NOME FROM censo ORDER BY ID"),
        vec![vec!["Goiânia"], vec!["São Luís"]]
    );
}

#[test]
fn duplicate_header_column_is_rejected_before_loading() {
    let ws = TestWorkspace::new();
    let dict = ws.dictionary();
    let csv = ws.write("microdados.csv", "ID;NOME;ID\n1;Ana;1\n");
    let mut store = SqliteStore::open_in_memory().expect("store");

    let err = pipeline::load(&mut store, &csv, &dict, &by_dictionary()).unwrap_err();

    assert!(matches!(err, IngestError::Schema(_)), "unexpected error: {err}");
    assert_eq!(store.table_columns("censo").expect("pragma"), None);
}

#[test]
fn report_on_missing_table_is_not_found() {
    let mut store = SqliteStore::open_in_memory().expect("store");
    let err = report::report(&mut store, "censo", &ReconciliationReport::default()).unwrap_err();
    assert!(matches!(err, IngestError::NotFound(ref table) if table == "censo"));
}
