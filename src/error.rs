// src/error.rs

use thiserror::Error;

/// The engine's error taxonomy.
///
/// Each variant corresponds to one of the classes in the error-handling
/// design: how the orchestrator reacts to a failure depends on which
/// variant it sees, not on inspecting a message string.
#[derive(Error, Debug)]
pub enum Error {
    /// The spreadsheet could not be read by either the modern or the legacy
    /// reader. The file is skipped; no ledger entry is written.
    #[error("could not read workbook {path}: modern reader failed ({modern}); legacy reader failed ({legacy})")]
    Read {
        path: String,
        modern: String,
        legacy: String,
    },

    /// A DDL operation failed (create table, add column, alter type).
    /// Fatal for the file currently being imported.
    #[error("schema change failed on table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: postgres::Error,
    },

    /// An insert was rejected by a database constraint. Fatal for the file;
    /// no ledger entry is written, so a re-run will retry the whole file.
    #[error("insert into {table} rejected: {source}")]
    Integrity {
        table: String,
        #[source]
        source: postgres::Error,
    },

    /// The file is already present in the import ledger. Not a real error,
    /// callers treat this as a "skipped" outcome, never as a failure.
    #[error("{source_file} already imported into {table} with fingerprint {fingerprint}")]
    DuplicateImport {
        table: String,
        source_file: String,
        fingerprint: String,
    },

    /// The database connection could not be established or was lost.
    /// Fatal for the whole run; a checkpoint is written.
    #[error("database connection error: {0}")]
    Connection(#[from] postgres::Error),

    /// The resolved configuration is missing or malformed. Fatal for the
    /// whole run.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (file access, checkpoint read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the engine's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
