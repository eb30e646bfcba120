//! Schema for the configuration database.
//!
//! Two tables: `optimal_configs` holds the best-known parameters per
//! `(hash, region type, pass)` equivalence class and survives across
//! runs; `current_code_regions` records every region observed while
//! building the current run's search space, keyed by the full region
//! identity so duplicate observations coalesce to one row. Parameter
//! payloads are JSON TEXT columns.

use std::path::Path;

use rusqlite::Connection;

use super::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS optimal_configs (
    hashcode    TEXT NOT NULL,
    region_type TEXT NOT NULL,
    pass_name   TEXT NOT NULL,
    params      TEXT NOT NULL,
    PRIMARY KEY (hashcode, region_type, pass_name)
);

CREATE TABLE IF NOT EXISTS current_code_regions (
    name         TEXT NOT NULL,
    pass_name    TEXT NOT NULL,
    func_name    TEXT NOT NULL,
    region_type  TEXT NOT NULL,
    hashcode     TEXT NOT NULL,
    debug_file   TEXT NOT NULL,
    debug_line   TEXT NOT NULL,
    debug_column TEXT NOT NULL,
    invocation   TEXT NOT NULL,
    seen         INTEGER NOT NULL,
    PRIMARY KEY (name, pass_name, func_name, region_type, hashcode,
                 debug_file, debug_line, debug_column, invocation)
);
";

/// Opens (or creates) the database at `path` and ensures the schema
/// exists.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Opens an in-memory database (for tests).
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}
