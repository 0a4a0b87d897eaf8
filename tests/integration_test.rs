// tests/integration_test.rs

//! Integration tests for the spreadsheet-to-database ETL engine.
//!
//! Tests that only exercise the Row Source, normalizer, or inferencer need
//! no database and always run. Tests that exercise the Schema Manager,
//! Import Ledger, or full orchestrator run against a real PostgreSQL
//! instance and are gated on `DATABASE_URL`. Set it to run them, e.g. in
//! CI against a throwaway database. Without it they print a notice and
//! return early rather than failing the suite.

use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use sheetforge::config::Config;
use sheetforge::orchestrator::{FileOutcome, Orchestrator, RunOptions};
use sheetforge::rowsource::{CalamineRowSource, RowSource};
use std::collections::HashMap;
use std::path::Path;

fn write_workbook(path: &Path, sheet_name: &str, headers: &[&str], rows: &[Vec<CellFixture>]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet().set_name(sheet_name).unwrap();

    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            let r = (row_idx + 1) as u32;
            let c = col as u16;
            match value {
                CellFixture::Int(i) => {
                    sheet.write_number(r, c, *i as f64).unwrap();
                }
                CellFixture::Text(s) => {
                    sheet.write_string(r, c, s).unwrap();
                }
                CellFixture::Date(d) => {
                    sheet.write_date(r, c, *d).unwrap();
                }
            };
        }
    }

    workbook.save(path).unwrap();
}

enum CellFixture {
    Int(i64),
    Text(String),
    Date(chrono::NaiveDate),
}

#[test]
fn row_source_reads_fixed_size_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q1.xlsx");

    let rows: Vec<Vec<CellFixture>> = (1..=5)
        .map(|i| vec![CellFixture::Int(i), CellFixture::Text(format!("name-{i}"))])
        .collect();
    write_workbook(&path, "Data", &["id", "name"], &rows);

    let mut source = CalamineRowSource::open(&path, "Data", 2).unwrap();

    let mut total_rows = 0;
    let mut chunk_count = 0;
    while let Some(chunk) = source.next_chunk().unwrap() {
        assert_eq!(chunk.columns, vec!["id".to_string(), "name".to_string()]);
        assert!(chunk.rows.len() <= 2);
        total_rows += chunk.rows.len();
        chunk_count += 1;
    }

    assert_eq!(total_rows, 5);
    assert_eq!(chunk_count, 3); // 2 + 2 + 1
}

#[test]
fn row_source_reports_read_error_for_unreadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not_really_a_workbook.xlsx");
    std::fs::write(&path, b"this is not a spreadsheet").unwrap();

    let result = CalamineRowSource::open(&path, "Data", 100);
    assert!(result.is_err());
    match result {
        Err(sheetforge::Error::Read { modern, legacy, .. }) => {
            assert!(!modern.is_empty());
            assert!(!legacy.is_empty());
        }
        other => panic!("expected Read error, got {other:?}"),
    }
}

fn database_url() -> Option<String> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("DATABASE_URL not set; skipping database-backed integration test");
            None
        }
    }
}

fn unique_table_suffix() -> String {
    std::process::id().to_string()
}

#[test]
fn single_workbook_creates_table_and_ledger_entries() {
    let Some(url) = database_url() else { return };
    let mut client = sheetforge::db::connect(&url).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let suffix = unique_table_suffix();
    let folder = dir.path().join(format!("sales_{suffix}")).join("2024");
    std::fs::create_dir_all(&folder).unwrap();

    let rows: Vec<Vec<CellFixture>> = (1..=5)
        .map(|i| {
            vec![
                CellFixture::Int(i),
                CellFixture::Text(format!("name-{i}")),
                CellFixture::Date(NaiveDate::from_ymd_opt(2024, 1, i as u32).unwrap()),
            ]
        })
        .collect();
    write_workbook(&folder.join("q1.xlsx"), "Data", &["id", "name", "when"], &rows);

    let config = Config {
        default_sheet: "Data".to_string(),
        mapping: HashMap::new(),
    };
    let options = RunOptions { chunk_size: 10_000, ..Default::default() };
    let mut orchestrator = Orchestrator::new(&mut client, config, options, Default::default());
    let summary = orchestrator.run(dir.path()).unwrap();

    let imported: Vec<_> = summary
        .files
        .iter()
        .filter(|(_, outcome)| matches!(outcome, FileOutcome::Imported { .. }))
        .collect();
    assert_eq!(imported.len(), 1);
    if let (_, FileOutcome::Imported { rows }) = imported[0] {
        assert_eq!(*rows, 5);
    }
}

#[test]
fn rerun_of_unchanged_file_is_skipped() {
    let Some(url) = database_url() else { return };
    let mut client = sheetforge::db::connect(&url).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let suffix = unique_table_suffix();
    let folder = dir.path().join(format!("rerun_{suffix}")).join("2024");
    std::fs::create_dir_all(&folder).unwrap();

    let rows = vec![vec![CellFixture::Int(1), CellFixture::Text("a".to_string())]];
    write_workbook(&folder.join("q1.xlsx"), "Data", &["id", "name"], &rows);

    let config = Config { default_sheet: "Data".to_string(), mapping: HashMap::new() };
    let options = RunOptions { chunk_size: 10_000, ..Default::default() };

    {
        let mut orchestrator = Orchestrator::new(&mut client, config.clone(), options.clone(), Default::default());
        orchestrator.run(dir.path()).unwrap();
    }

    let mut orchestrator = Orchestrator::new(&mut client, config, options, Default::default());
    let summary = orchestrator.run(dir.path()).unwrap();

    assert!(summary.files.iter().all(|(_, outcome)| matches!(outcome, FileOutcome::Skipped)));
}
