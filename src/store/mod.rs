//! Persistent code-region store.
//!
//! Owns all equivalence-class bookkeeping for the tuning run: which
//! regions were observed this run (`current_code_regions`) and the
//! best-known configuration per `(hash, region type, pass)` class across
//! runs (`optimal_configs`).
//!
//! Every mutating operation runs inside its own transaction. A rusqlite
//! transaction rolls back when dropped without commit, so any error path
//! leaves the database in its pre-operation state before the error
//! propagates.

mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::engine::{EntityMerger, EntityRef};
use crate::region::{CodeRegion, ParamAssignment, RegionType, SourceLoc};

/// Name of the database file inside the configuration directory.
pub const STORE_FILE: &str = "configs.db";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("parameter payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted row: {0}")]
    Corrupt(String),
}

type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed store for code regions and optimal configurations.
#[derive(Debug)]
pub struct CodeRegionStore {
    conn: Connection,
    path: PathBuf,
}

impl CodeRegionStore {
    /// Opens (or creates) `configs.db` under `dir`, creating the schema
    /// on first use.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(STORE_FILE);
        let conn = schema::open_database(&path)?;
        Ok(Self { conn, path })
    }

    /// Opens an in-memory store (for tests).
    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: schema::open_in_memory()?, path: PathBuf::from(":memory:") })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes all rows from `current_code_regions`. Called exactly once,
    /// at the start of building a run's search space.
    pub fn clear_current_regions(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM current_code_regions", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Records that `region` was observed in this run. Upserts by full
    /// identity: a second observation of the identical tuple is a no-op
    /// (identical opportunities appear in separate files when tuning
    /// multi-file programs).
    pub fn record_region(&mut self, region: &CodeRegion, seen: bool) -> Result<()> {
        let (file, line, column) = loc_columns(region);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO current_code_regions
             (name, pass_name, func_name, region_type, hashcode,
              debug_file, debug_line, debug_column, invocation, seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                region.name,
                region.pass_name,
                region.func_name,
                region.region_type.as_str(),
                region.hash,
                file,
                line,
                column,
                region.invocation.to_string(),
                seen,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// True iff an optimal configuration is stored for the class.
    pub fn equivalence_class_has_optimal(
        &self,
        hash: &str,
        region_type: RegionType,
        pass_name: &str,
    ) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM optimal_configs
              WHERE hashcode = ?1 AND region_type = ?2 AND pass_name = ?3)",
            params![hash, region_type.as_str(), pass_name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Stored parameters for the class, if any.
    pub fn get_optimal_parameters(
        &self,
        hash: &str,
        region_type: RegionType,
        pass_name: &str,
    ) -> Result<Option<ParamAssignment>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT params FROM optimal_configs
                  WHERE hashcode = ?1 AND region_type = ?2 AND pass_name = ?3",
                params![hash, region_type.as_str(), pass_name],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// True iff more than one `current_code_regions` row shares the
    /// class key. The first occurrence of a class is always tuned;
    /// subsequent occurrences in the same run are pruned.
    pub fn equivalence_class_multiply_observed(
        &self,
        hash: &str,
        region_type: RegionType,
        pass_name: &str,
    ) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM current_code_regions
              WHERE hashcode = ?1 AND region_type = ?2 AND pass_name = ?3",
            params![hash, region_type.as_str(), pass_name],
            |row| row.get(0),
        )?;
        Ok(count > 1)
    }

    /// Stores the class's optimal parameters with replace semantics:
    /// delete-then-insert, so the last write in a batch wins.
    pub fn upsert_optimal(
        &mut self,
        hash: &str,
        region_type: RegionType,
        pass_name: &str,
        parameters: &ParamAssignment,
    ) -> Result<()> {
        let payload = serde_json::to_string(parameters)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM optimal_configs
              WHERE hashcode = ?1 AND region_type = ?2 AND pass_name = ?3",
            params![hash, region_type.as_str(), pass_name],
        )?;
        tx.execute(
            "INSERT INTO optimal_configs (hashcode, region_type, pass_name, params)
             VALUES (?1, ?2, ?3, ?4)",
            params![hash, region_type.as_str(), pass_name, payload],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Every region observed this run, with its stored parameters
    /// attached iff an optimal configuration exists AND (the row is
    /// marked seen, or `include_unseen_as_solved` is set). The latter
    /// mode backs baseline-file generation, which honors any stored
    /// configuration regardless of the seen flag.
    pub fn list_current_regions(
        &self,
        include_unseen_as_solved: bool,
    ) -> Result<Vec<(CodeRegion, Option<ParamAssignment>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, pass_name, func_name, region_type, hashcode,
                    debug_file, debug_line, debug_column, invocation, seen
               FROM current_code_regions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, bool>(9)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (name, pass, func, type_str, hash, file, line, column, invocation, seen) = row?;
            let region_type = RegionType::parse(&type_str)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown region type {type_str:?}")))?;
            let invocation: u32 = invocation
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("bad invocation {invocation:?}")))?;

            let mut region = CodeRegion::new(name, pass, func, region_type, hash, invocation);
            if !file.is_empty() && !line.is_empty() && !column.is_empty() {
                let line = line
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("bad line {line:?}")))?;
                let column = column
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("bad column {column:?}")))?;
                region = region.with_source_loc(SourceLoc { file, line, column });
            }

            let stored =
                self.get_optimal_parameters(&region.hash, region.region_type, &region.pass_name)?;
            let parameters = if seen || include_unseen_as_solved { stored } else { None };
            results.push((region, parameters));
        }
        Ok(results)
    }

    /// Number of rows in `current_code_regions` (diagnostics and tests).
    pub fn current_region_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM current_code_regions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of current rows marked seen.
    pub fn seen_region_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM current_code_regions WHERE seen = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Commits any outstanding work and closes the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))
    }
}

/// Identity-map reconciliation for entities backed by this store. Only
/// `optimal_configs` rows belong to it; entities from other tables (the
/// engine's own results database) are left untouched for that store's
/// merger.
impl EntityMerger for CodeRegionStore {
    fn merge(&mut self, mut entity: EntityRef) -> crate::error::Result<EntityRef> {
        if entity.table != "optimal_configs" || entity.key.len() != 3 {
            return Ok(entity);
        }
        let region_type = RegionType::parse(&entity.key[1])
            .ok_or_else(|| StoreError::Corrupt(format!("unknown region type {:?}", entity.key[1])))?;
        if let Some(params) =
            self.get_optimal_parameters(&entity.key[0], region_type, &entity.key[2])?
        {
            entity.fields.insert("params".to_string(), serde_json::to_value(&params)?);
        }
        entity.attached = true;
        Ok(entity)
    }
}

fn loc_columns(region: &CodeRegion) -> (String, String, String) {
    match &region.source_loc {
        Some(loc) => (loc.file.clone(), loc.line.to_string(), loc.column.to_string()),
        None => (String::new(), String::new(), String::new()),
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::region::ParamValue;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_record_region_idempotent(
            name in "[a-z][a-z0-9.]{0,12}",
            hash in "[0-9a-f]{1,16}",
            repeats in 2usize..5,
        ) {
            let mut store = CodeRegionStore::in_memory().unwrap();
            let region = CodeRegion::new(name, "loop-unroll", "f", RegionType::Loop, hash, 0);
            for _ in 0..repeats {
                store.record_region(&region, false).unwrap();
            }
            prop_assert_eq!(store.current_region_count().unwrap(), 1);
        }

        #[test]
        fn prop_upsert_last_write_wins(
            hash in "[0-9a-f]{1,16}",
            values in prop::collection::vec(-1000i64..1000, 1..8),
        ) {
            let mut store = CodeRegionStore::in_memory().unwrap();
            for v in &values {
                let params = ParamAssignment::from([
                    ("UnrollCount".to_string(), ParamValue::Int(*v)),
                ]);
                store.upsert_optimal(&hash, RegionType::Loop, "loop-unroll", &params).unwrap();
            }
            let stored = store
                .get_optimal_parameters(&hash, RegionType::Loop, "loop-unroll")
                .unwrap()
                .unwrap();
            let last = *values.last().unwrap();
            prop_assert_eq!(stored.get("UnrollCount"), Some(&ParamValue::Int(last)));
        }
    }
}
