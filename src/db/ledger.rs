// src/db/ledger.rs

//! The Import Ledger: the two append-only audit tables (`etl_imports`,
//! `etl_schema_changes`) and the operations built on them: "is this file
//! already imported", recording new imports and schema changes, and
//! reverting either a file's rows or its (invertible) schema changes.

use crate::error::{Error, Result};
use crate::infer::SqlType;
use chrono::{DateTime, Utc};
use postgres::Client;

/// The kind of schema change a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    CreateTable,
    AddColumn,
    AlterType,
}

impl ChangeType {
    fn as_str(self) -> &'static str {
        match self {
            ChangeType::CreateTable => "create_table",
            ChangeType::AddColumn => "add_column",
            ChangeType::AlterType => "alter_type",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "create_table" => Some(ChangeType::CreateTable),
            "add_column" => Some(ChangeType::AddColumn),
            "alter_type" => Some(ChangeType::AlterType),
            _ => None,
        }
    }
}

/// One planned (or, outside dry-run, executed) step of `revert_schema_changes`.
#[derive(Debug, Clone)]
pub struct RevertPlanItem {
    pub change_type: ChangeType,
    pub column_name: Option<String>,
    pub invertible: bool,
    pub executed: bool,
}

/// The Import Ledger. Stateless: every operation takes the shared
/// `&mut Client` explicitly rather than owning a connection, since the
/// engine threads one connection through every component. No hidden
/// singleton.
pub struct Ledger;

impl Ledger {
    /// Create the two audit tables if they do not already exist. Idempotent.
    pub fn migrate(client: &mut Client) -> Result<()> {
        client.batch_execute(
            "
            CREATE TABLE IF NOT EXISTS etl_imports (
                id BIGSERIAL PRIMARY KEY,
                table_name TEXT NOT NULL,
                source_file TEXT NOT NULL,
                file_sha256 TEXT NOT NULL,
                row_count BIGINT NOT NULL,
                imported_at TIMESTAMP NOT NULL,
                UNIQUE (table_name, source_file, file_sha256)
            );

            CREATE TABLE IF NOT EXISTS etl_schema_changes (
                id BIGSERIAL PRIMARY KEY,
                table_name TEXT NOT NULL,
                change_type TEXT NOT NULL,
                column_name TEXT,
                old_type TEXT,
                new_type TEXT,
                source_file TEXT NOT NULL,
                changed_at TIMESTAMP NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_etl_imports_lookup
                ON etl_imports (table_name, source_file, file_sha256);

            CREATE INDEX IF NOT EXISTS idx_etl_schema_changes_table
                ON etl_schema_changes (table_name, changed_at);
            ",
        )?;
        Ok(())
    }

    /// Does `(table_name, source_file, fingerprint)` already have an entry?
    pub fn is_imported(
        client: &mut Client,
        table_name: &str,
        source_file: &str,
        fingerprint: &str,
    ) -> Result<bool> {
        let row = client.query_one(
            "SELECT EXISTS (
                SELECT 1 FROM etl_imports
                WHERE table_name = $1 AND source_file = $2 AND file_sha256 = $3
            )",
            &[&table_name, &source_file, &fingerprint],
        )?;
        Ok(row.get(0))
    }

    /// Append a new import entry. The `(table_name, source_file,
    /// file_sha256)` uniqueness constraint rejects duplicates.
    pub fn record_import(
        client: &mut Client,
        table_name: &str,
        source_file: &str,
        fingerprint: &str,
        row_count: i64,
        imported_at: DateTime<Utc>,
    ) -> Result<()> {
        client
            .execute(
                "INSERT INTO etl_imports (table_name, source_file, file_sha256, row_count, imported_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&table_name, &source_file, &fingerprint, &row_count, &imported_at.naive_utc()],
            )
            .map_err(|e| Error::Integrity { table: "etl_imports".to_string(), source: e })?;
        Ok(())
    }

    /// Append-only: record a single schema change.
    #[allow(clippy::too_many_arguments)]
    pub fn record_schema_change(
        client: &mut Client,
        table_name: &str,
        change_type: ChangeType,
        column_name: Option<&str>,
        old_type: Option<SqlType>,
        new_type: Option<SqlType>,
        source_file: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<()> {
        let old_type_str = old_type.map(|t| t.to_string());
        let new_type_str = new_type.map(|t| t.to_string());

        client.execute(
            "INSERT INTO etl_schema_changes
                (table_name, change_type, column_name, old_type, new_type, source_file, changed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &table_name,
                &change_type.as_str(),
                &column_name,
                &old_type_str,
                &new_type_str,
                &source_file,
                &changed_at.naive_utc(),
            ],
        )?;
        Ok(())
    }

    /// Delete `table_name` rows whose `file_sha256` metadata matches
    /// `fingerprint` (joined via the import ledger, since the target table
    /// itself only carries `source_file`/`load_timestamp`), then delete the
    /// ledger row. Returns the number of target-table rows deleted.
    pub fn revert_by_fingerprint(client: &mut Client, table_name: &str, fingerprint: &str) -> Result<u64> {
        let mut txn = client.transaction()?;

        let source_files: Vec<String> = txn
            .query(
                "SELECT source_file FROM etl_imports WHERE table_name = $1 AND file_sha256 = $2",
                &[&table_name, &fingerprint],
            )?
            .into_iter()
            .map(|row| row.get(0))
            .collect();

        let mut deleted = 0u64;
        for source_file in &source_files {
            let sql = format!("DELETE FROM {table_name} WHERE source_file = $1");
            deleted += txn.execute(&sql, &[source_file])?;
        }

        txn.execute(
            "DELETE FROM etl_imports WHERE table_name = $1 AND file_sha256 = $2",
            &[&table_name, &fingerprint],
        )?;

        txn.commit()?;
        Ok(deleted)
    }

    /// Delete `table_name` rows whose `source_file` metadata column matches,
    /// then delete the ledger row. Returns the number of rows deleted.
    pub fn revert_by_source_file(client: &mut Client, table_name: &str, source_file: &str) -> Result<u64> {
        let mut txn = client.transaction()?;

        let sql = format!("DELETE FROM {table_name} WHERE source_file = $1");
        let deleted = txn.execute(&sql, &[&source_file])?;

        txn.execute(
            "DELETE FROM etl_imports WHERE table_name = $1 AND source_file = $2",
            &[&table_name, &source_file],
        )?;

        txn.commit()?;
        Ok(deleted)
    }

    /// Undo `add_column` changes (DROP COLUMN) for `table_name`/`source_file`
    /// in reverse chronological order. `alter_type` and `create_table` are
    /// non-invertible and are reported, never executed. With `dry_run`, the
    /// plan is returned without touching the database.
    pub fn revert_schema_changes(
        client: &mut Client,
        table_name: &str,
        source_file: &str,
        dry_run: bool,
    ) -> Result<Vec<RevertPlanItem>> {
        let rows = client.query(
            "SELECT change_type, column_name FROM etl_schema_changes
             WHERE table_name = $1 AND source_file = $2
             ORDER BY changed_at DESC, id DESC",
            &[&table_name, &source_file],
        )?;

        let mut plan = Vec::new();
        for row in rows {
            let change_type_str: String = row.get(0);
            let column_name: Option<String> = row.get(1);
            let Some(change_type) = ChangeType::from_str(&change_type_str) else {
                continue;
            };

            let invertible = matches!(change_type, ChangeType::AddColumn);
            let mut executed = false;

            if invertible && !dry_run {
                if let Some(column) = &column_name {
                    let ddl = format!("ALTER TABLE {table_name} DROP COLUMN {column}");
                    client
                        .batch_execute(&ddl)
                        .map_err(|e| Error::Schema { table: table_name.to_string(), source: e })?;
                    executed = true;
                }
            }

            plan.push(RevertPlanItem {
                change_type,
                column_name,
                invertible,
                executed,
            });
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_round_trips() {
        for ct in [ChangeType::CreateTable, ChangeType::AddColumn, ChangeType::AlterType] {
            assert_eq!(ChangeType::from_str(ct.as_str()), Some(ct));
        }
        assert_eq!(ChangeType::from_str("bogus"), None);
    }
}
