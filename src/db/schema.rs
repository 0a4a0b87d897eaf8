// src/db/schema.rs

//! The Schema Manager: owns every DDL operation the engine performs
//! (table creation, column addition, and type widening) and logs each one
//! through the Import Ledger.

use crate::db::ledger::{ChangeType, Ledger};
use crate::error::{Error, Result};
use crate::infer::SqlType;
use chrono::Utc;
use postgres::Client;
use std::collections::HashMap;

/// Two engine-managed columns present on every target table.
pub const SOURCE_FILE_COLUMN: &str = "source_file";
pub const LOAD_TIMESTAMP_COLUMN: &str = "load_timestamp";

/// Owns the small per-table column-type cache used within a single
/// `ensure_table` + `reconcile` pair. The cache is dropped (invalidated)
/// after every `reconcile` call. `introspect` must always reflect the live
/// catalog, never a stale cache.
#[derive(Default)]
pub struct SchemaManager {
    cache: HashMap<String, HashMap<String, SqlType>>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the live `{column: type}` mapping for `table_name` straight from
    /// `information_schema.columns`.
    pub fn introspect(&mut self, client: &mut Client, table_name: &str) -> Result<HashMap<String, SqlType>> {
        let rows = client.query(
            "SELECT column_name, data_type FROM information_schema.columns WHERE table_name = $1",
            &[&table_name],
        )?;

        let mut columns = HashMap::new();
        for row in rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            if let Some(sql_type) = sql_type_from_catalog(&data_type) {
                columns.insert(name, sql_type);
            }
        }

        self.cache.insert(table_name.to_string(), columns.clone());
        Ok(columns)
    }

    fn table_exists(&mut self, client: &mut Client, table_name: &str) -> Result<bool> {
        let row = client.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
            &[&table_name],
        )?;
        Ok(row.get(0))
    }

    /// Create `table_name` with `inferred_columns` plus the two metadata
    /// columns if it does not already exist; no-op otherwise.
    pub fn ensure_table(
        &mut self,
        client: &mut Client,
        table_name: &str,
        inferred_columns: &[(String, SqlType)],
        source_file: &str,
    ) -> Result<()> {
        if self.table_exists(client, table_name)? {
            return Ok(());
        }

        let mut column_defs: Vec<String> = inferred_columns
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect();
        column_defs.push(format!("{SOURCE_FILE_COLUMN} TEXT NOT NULL"));
        column_defs.push(format!("{LOAD_TIMESTAMP_COLUMN} TIMESTAMP NOT NULL"));

        let ddl = format!(
            "CREATE TABLE {table_name} ({cols})",
            cols = column_defs.join(", ")
        );

        client
            .batch_execute(&ddl)
            .map_err(|e| Error::Schema { table: table_name.to_string(), source: e })?;

        let now = Utc::now();
        Ledger::record_schema_change(
            client,
            table_name,
            ChangeType::CreateTable,
            None,
            None,
            None,
            source_file,
            now,
        )?;
        for (name, ty) in inferred_columns {
            Ledger::record_schema_change(
                client,
                table_name,
                ChangeType::AddColumn,
                Some(name.as_str()),
                None,
                Some(*ty),
                source_file,
                now,
            )?;
        }

        self.cache.remove(table_name);
        tracing::info!(table = table_name, "created target table");
        Ok(())
    }

    /// Align `table_name`'s live column set/types with `inferred_columns`,
    /// adding missing columns and widening existing ones along the ladder.
    /// Never takes a lateral move: the join of the live type and the
    /// inferred type is computed, and if it differs from the live type the
    /// column is altered to the join.
    pub fn reconcile(
        &mut self,
        client: &mut Client,
        table_name: &str,
        inferred_columns: &[(String, SqlType)],
        source_file: &str,
    ) -> Result<()> {
        let live = self.introspect(client, table_name)?;
        let now = Utc::now();

        for (name, inferred_ty) in inferred_columns {
            match live.get(name) {
                None => {
                    let ddl = format!("ALTER TABLE {table_name} ADD COLUMN {name} {inferred_ty}");
                    client
                        .batch_execute(&ddl)
                        .map_err(|e| Error::Schema { table: table_name.to_string(), source: e })?;

                    Ledger::record_schema_change(
                        client,
                        table_name,
                        ChangeType::AddColumn,
                        Some(name.as_str()),
                        None,
                        Some(*inferred_ty),
                        source_file,
                        now,
                    )?;
                    tracing::info!(table = table_name, column = name, ty = %inferred_ty, "added column");
                }
                Some(&live_ty) => {
                    let joined = live_ty.join(*inferred_ty);
                    if joined == live_ty {
                        continue;
                    }

                    let ddl = if joined == SqlType::Text {
                        format!(
                            "ALTER TABLE {table_name} ALTER COLUMN {name} TYPE {joined} USING {name}::text"
                        )
                    } else {
                        format!("ALTER TABLE {table_name} ALTER COLUMN {name} TYPE {joined}")
                    };

                    client
                        .batch_execute(&ddl)
                        .map_err(|e| Error::Schema { table: table_name.to_string(), source: e })?;

                    Ledger::record_schema_change(
                        client,
                        table_name,
                        ChangeType::AlterType,
                        Some(name.as_str()),
                        Some(live_ty),
                        Some(joined),
                        source_file,
                        now,
                    )?;
                    tracing::info!(
                        table = table_name,
                        column = name,
                        from = %live_ty,
                        to = %joined,
                        "widened column"
                    );
                }
            }
        }

        // Invalidate: the next introspect must hit the live catalog again.
        self.cache.remove(table_name);
        Ok(())
    }
}

fn sql_type_from_catalog(data_type: &str) -> Option<SqlType> {
    match data_type {
        "integer" => Some(SqlType::Integer),
        "bigint" => Some(SqlType::BigInt),
        "double precision" => Some(SqlType::Double),
        "date" => Some(SqlType::Date),
        "timestamp without time zone" | "timestamp with time zone" => Some(SqlType::Timestamp),
        "boolean" => Some(SqlType::Boolean),
        "text" | "character varying" => Some(SqlType::Text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_type_round_trips_the_ladder() {
        assert_eq!(sql_type_from_catalog("integer"), Some(SqlType::Integer));
        assert_eq!(sql_type_from_catalog("double precision"), Some(SqlType::Double));
        assert_eq!(sql_type_from_catalog("timestamp without time zone"), Some(SqlType::Timestamp));
        assert_eq!(sql_type_from_catalog("nonsense"), None);
    }
}
