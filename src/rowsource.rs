// src/rowsource.rs

//! The Row Source: a pull-based, non-restartable iterator over fixed-size
//! row batches ("chunks") from one sheet of one workbook file.
//!
//! `RowSource` is a trait so the chunk loader never depends on `calamine`
//! directly, only on "give me the next chunk, or tell me you're done".
//! [`CalamineRowSource`] is the concrete adapter: it tries the modern
//! (`.xlsx`/`.xlsm`) reader first and falls back to the legacy `.xls`
//! reader, surfacing both underlying causes if neither succeeds.

use crate::error::{Error, Result};
use crate::infer::CellValue;
use calamine::{open_workbook, Data, Reader, Xls, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

/// An ordered batch of up to `chunk_size` rows sharing a column set.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pull-based contract for a sheet's row batches.
pub trait RowSource {
    /// Returns the next chunk, or `Ok(None)` at end-of-stream.
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

fn calamine_value_to_cell(value: &Data) -> CellValue {
    match value {
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => {
                if naive.time() == chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap() {
                    CellValue::Date(naive.date())
                } else {
                    CellValue::DateTime(naive)
                }
            }
            // "Not-a-time" sentinels (e.g. a corrupt/empty temporal serial)
            // must become null, never a literal string.
            None => CellValue::Null,
        },
        Data::DateTimeIso(s) => parse_iso_temporal(s),
        Data::DurationIso(_) => CellValue::Null,
        Data::Error(_) => CellValue::Null,
        Data::Empty => CellValue::Null,
    }
}

fn parse_iso_temporal(s: &str) -> CellValue {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return CellValue::DateTime(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return CellValue::Date(d);
    }
    if s.trim().is_empty() {
        return CellValue::Null;
    }
    CellValue::Text(s.to_string())
}

/// The concrete, calamine-backed Row Source.
///
/// Once constructed it has already read the whole sheet into memory (this
/// is calamine's contract: it parses a worksheet `Range` eagerly) and then
/// hands it out in `chunk_size`-row slices, so memory for a chunk is
/// released as soon as the caller drops it, but the backing range lives for
/// the lifetime of the source. Non-restartable: there is no `seek`.
pub struct CalamineRowSource {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
    chunk_size: usize,
    cursor: usize,
}

impl CalamineRowSource {
    /// Open `path`, select `sheet_name`, and prepare to yield chunks of
    /// `chunk_size` rows. The first row of the sheet is treated as the
    /// header and becomes the (pre-normalization) column names.
    pub fn open(path: &Path, sheet_name: &str, chunk_size: usize) -> Result<Self> {
        let range = Self::read_range(path, sheet_name)?;

        let mut rows_iter = range.rows();
        let header: Vec<String> = match rows_iter.next() {
            Some(row) => row.iter().map(|c| c.to_string()).collect(),
            None => Vec::new(),
        };

        let width = header.len();
        let rows: Vec<Vec<CellValue>> = rows_iter
            .map(|row| {
                let mut cells: Vec<CellValue> = row.iter().map(calamine_value_to_cell).collect();
                cells.resize(width, CellValue::Null);
                cells
            })
            .collect();

        Ok(Self {
            columns: header,
            rows,
            chunk_size: chunk_size.max(1),
            cursor: 0,
        })
    }

    fn read_range(path: &Path, sheet_name: &str) -> Result<calamine::Range<Data>> {
        let modern_err = match open_workbook::<Xlsx<_>, _>(path) {
            Ok(mut wb) => match wb.worksheet_range(sheet_name) {
                Ok(range) => return Ok(range),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        let legacy_err = match open_workbook::<Xls<_>, _>(path) {
            Ok(mut wb) => match wb.worksheet_range(sheet_name) {
                Ok(range) => return Ok(range),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        Err(Error::Read {
            path: path.display().to_string(),
            modern: modern_err,
            legacy: legacy_err,
        })
    }
}

impl RowSource for CalamineRowSource {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.chunk_size).min(self.rows.len());
        let rows = self.rows[self.cursor..end].to_vec();
        self.cursor = end;

        Ok(Some(Chunk {
            columns: self.columns.clone(),
            rows,
        }))
    }
}

/// Recognized spreadsheet extensions (calamine's supported set), used by
/// the orchestrator to decide which files belong to a leaf folder.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

pub fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RECOGNIZED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Absolute path of a workbook file, as recorded in `source_file`.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    Ok(std::fs::canonicalize(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_extensions_are_case_insensitive() {
        assert!(has_recognized_extension(Path::new("q1.XLSX")));
        assert!(has_recognized_extension(Path::new("q1.xls")));
        assert!(!has_recognized_extension(Path::new("q1.csv")));
    }
}
