// src/loader.rs

//! The Chunk Loader: pulls chunks from a Row Source, reconciles schema via
//! the Schema Manager, sanitizes values, and bulk-inserts each chunk.

use crate::db::ledger::Ledger;
use crate::db::schema::{SchemaManager, LOAD_TIMESTAMP_COLUMN, SOURCE_FILE_COLUMN};
use crate::error::{Error, Result};
use crate::infer::{infer_column_type, CellValue, SqlType};
use crate::normalize::normalize_and_dedup;
use crate::rowsource::{CalamineRowSource, RowSource};
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::Client;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// What happened when the loader tried to import a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Imported { rows: u64 },
    Skipped,
}

/// Stream a file's bytes through SHA-256 without loading it whole into
/// memory, producing the 256-bit content fingerprint.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Replace temporal-null sentinels with real SQL nulls. `CellValue` already
/// normalizes "not-a-time" cells to `Null` at the Row Source boundary; this
/// pass is the loader-side backstop so any value that slipped through a
/// future Row Source implementation is still caught before it reaches
/// insertion as a literal string.
fn sanitize_temporal_sentinels(rows: &mut [Vec<CellValue>]) {
    const SENTINELS: &[&str] = &["NaT", "nat", "NAT"];
    for row in rows.iter_mut() {
        for cell in row.iter_mut() {
            if let CellValue::Text(s) = cell {
                if SENTINELS.contains(&s.as_str()) {
                    *cell = CellValue::Null;
                }
            }
        }
    }
}

fn cell_to_sql(value: &CellValue, target: SqlType) -> Box<dyn ToSql + Sync + 'static> {
    match (value, target) {
        (CellValue::Null, _) => Box::new(None::<String>),
        (CellValue::Int(i), SqlType::Integer) => Box::new(*i as i32),
        (CellValue::Int(i), SqlType::BigInt) => Box::new(*i),
        (CellValue::Int(i), SqlType::Double) => Box::new(*i as f64),
        (CellValue::Float(f), SqlType::Double) => Box::new(*f),
        (CellValue::Bool(b), SqlType::Boolean) => Box::new(*b),
        (CellValue::Date(d), SqlType::Date) => Box::new(*d),
        (CellValue::DateTime(dt), SqlType::Timestamp) => Box::new(*dt),
        // Every value widens cleanly to TEXT via its own Display-ish form.
        (v, SqlType::Text) => Box::new(cell_to_text(v)),
        // Any other pairing (inferred type on this chunk narrower than the
        // reconciled column) still needs a same-typed value: fall back to
        // text, which every live column accepts once widened.
        (v, _) => Box::new(cell_to_text(v)),
    }
}

fn cell_to_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Null => None,
        CellValue::Int(i) => Some(i.to_string()),
        CellValue::Float(f) => Some(f.to_string()),
        CellValue::Bool(b) => Some(b.to_string()),
        CellValue::Date(d) => Some(d.to_string()),
        CellValue::DateTime(dt) => Some(dt.to_string()),
        CellValue::Text(s) => Some(s.clone()),
    }
}

/// Runs one file's full import: skip-if-duplicate, then chunk-by-chunk
/// schema reconciliation and bulk insert, then (on full success) a single
/// ledger entry.
pub struct ChunkLoader<'a> {
    client: &'a mut Client,
    schema: SchemaManager,
}

impl<'a> ChunkLoader<'a> {
    pub fn new(client: &'a mut Client) -> Self {
        Self {
            client,
            schema: SchemaManager::new(),
        }
    }

    /// Import `file_path`'s `sheet_name` into `table_name`, at `chunk_size`
    /// rows per chunk. Returns `Skipped` if the ledger already has this
    /// exact `(table, file, fingerprint)` triple.
    pub fn load_file(
        &mut self,
        table_name: &str,
        sheet_name: &str,
        file_path: &Path,
        chunk_size: usize,
    ) -> Result<LoadOutcome> {
        let absolute_path = crate::rowsource::absolute_path(file_path)?;
        let source_file = absolute_path.display().to_string();
        let fingerprint = fingerprint_file(file_path)?;

        if Ledger::is_imported(self.client, table_name, &source_file, &fingerprint)? {
            tracing::info!(table = table_name, file = %source_file, "already imported, skipping");
            return Ok(LoadOutcome::Skipped);
        }

        let mut source = CalamineRowSource::open(file_path, sheet_name, chunk_size)?;
        let load_timestamp: DateTime<Utc> = Utc::now();
        let mut total_rows: u64 = 0;
        let mut first_chunk = true;

        while let Some(mut chunk) = source.next_chunk()? {
            if chunk.is_empty() {
                continue;
            }

            let columns = normalize_and_dedup(&chunk.columns);
            sanitize_temporal_sentinels(&mut chunk.rows);

            let inferred: Vec<(String, SqlType)> = columns
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let col_values: Vec<CellValue> =
                        chunk.rows.iter().map(|row| row.get(i).cloned().unwrap_or(CellValue::Null)).collect();
                    (name.clone(), infer_column_type(&col_values))
                })
                .collect();

            if first_chunk {
                self.schema.ensure_table(self.client, table_name, &inferred, &source_file)?;
                first_chunk = false;
            }
            self.schema.reconcile(self.client, table_name, &inferred, &source_file)?;

            let live_types = self.schema.introspect(self.client, table_name)?;
            self.insert_chunk(table_name, &columns, &chunk.rows, &live_types, &source_file, load_timestamp)?;

            total_rows += chunk.rows.len() as u64;
        }

        Ledger::record_import(self.client, table_name, &source_file, &fingerprint, total_rows as i64, load_timestamp)?;

        Ok(LoadOutcome::Imported { rows: total_rows })
    }

    fn insert_chunk(
        &mut self,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
        live_types: &std::collections::HashMap<String, SqlType>,
        source_file: &str,
        load_timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut column_list: Vec<String> = columns.to_vec();
        column_list.push(SOURCE_FILE_COLUMN.to_string());
        column_list.push(LOAD_TIMESTAMP_COLUMN.to_string());

        let placeholders: Vec<String> = (1..=column_list.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {table_name} ({cols}) VALUES ({vals})",
            cols = column_list.join(", "),
            vals = placeholders.join(", ")
        );

        let stmt = self
            .client
            .prepare(&sql)
            .map_err(|e| Error::Schema { table: table_name.to_string(), source: e })?;

        let mut txn = self.client.transaction()?;
        for row in rows {
            let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(column_list.len());
            for (i, name) in columns.iter().enumerate() {
                let target = live_types.get(name).copied().unwrap_or(SqlType::Text);
                let value = row.get(i).cloned().unwrap_or(CellValue::Null);
                params.push(cell_to_sql(&value, target));
            }
            let source_file_owned = source_file.to_string();
            params.push(Box::new(source_file_owned));
            params.push(Box::new(load_timestamp.naive_utc()));

            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
            txn.execute(&stmt, &refs)
                .map_err(|e| Error::Integrity { table: table_name.to_string(), source: e })?;
        }
        txn.commit()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_nat_sentinels() {
        let mut rows = vec![vec![CellValue::Text("NaT".to_string()), CellValue::Int(1)]];
        sanitize_temporal_sentinels(&mut rows);
        assert_eq!(rows[0][0], CellValue::Null);
        assert_eq!(rows[0][1], CellValue::Int(1));
    }

    #[test]
    fn fingerprint_is_stable_for_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xlsx");
        std::fs::write(&path, b"hello world").unwrap();
        let first = fingerprint_file(&path).unwrap();
        let second = fingerprint_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
