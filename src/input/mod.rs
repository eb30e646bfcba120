//! Compiler-input composition.
//!
//! The compiler consumes a configuration file mapping each code region to
//! concrete argument values. Opportunities arrive already parsed; the
//! format-specific reader/writer pair sits behind traits, with a JSON
//! implementation used by tests and as the reference encoding.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::Configuration;
use crate::error::Result;
use crate::fsutil;
use crate::region::{CodeRegion, ParamAssignment, ParamDomain, RegionType, Task, TaskMap};
use crate::store::CodeRegionStore;

/// One tunable region as reported by the compiler, parameters with their
/// domains attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub region: CodeRegion,
    pub params: Vec<(String, ParamDomain)>,
}

/// One line of compiler input: a region plus the argument values to apply
/// to it, keyed by raw field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub region: CodeRegion,
    pub args: ParamAssignment,
}

/// Writes a compiler-input file. Implementations own the encoding; the
/// core only decides what entries go in it.
pub trait InputWriter {
    fn write(&self, path: &Path, entries: &[ConfigEntry]) -> Result<()>;
}

/// Reference writer: a JSON array of entries, created with owner-only
/// permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonInputWriter;

impl InputWriter for JsonInputWriter {
    fn write(&self, path: &Path, entries: &[ConfigEntry]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        fsutil::write_secure(path, &bytes)
    }
}

/// Extracts one task's argument values from a full engine configuration,
/// translating flattened names back to raw field names.
pub fn task_args(task: &Task, config: &Configuration) -> ParamAssignment {
    let mut args = ParamAssignment::new();
    for param in &task.params {
        if let Some(value) = config.get(&param.name) {
            args.insert(param.field.clone(), value.clone());
        }
    }
    args
}

/// Composes the entries for one trial's input file.
///
/// With hash matching every observed region row is emitted: rows whose
/// class is being tuned this run take the engine's proposed values, while
/// rows marked seen keep their stored configuration. Without hash
/// matching the store holds nothing and each task maps to one entry.
pub fn compose_entries(
    store: &CodeRegionStore,
    use_hash_matching: bool,
    task_map: &TaskMap,
    config: &Configuration,
) -> Result<Vec<ConfigEntry>> {
    if !use_hash_matching {
        return Ok(task_map
            .values()
            .map(|task| ConfigEntry { region: task.region.clone(), args: task_args(task, config) })
            .collect());
    }

    let mut class_args: Vec<((String, RegionType, String), ParamAssignment)> = Vec::new();
    for task in task_map.values() {
        let (hash, region_type, pass) = task.region.class_key();
        class_args.push((
            (hash.to_string(), region_type, pass.to_string()),
            task_args(task, config),
        ));
    }
    let lookup = |region: &CodeRegion| -> Option<ParamAssignment> {
        let (hash, region_type, pass) = region.class_key();
        class_args
            .iter()
            .find(|((h, t, p), _)| h == hash && *t == region_type && p == pass)
            .map(|(_, args)| args.clone())
    };

    let mut entries = Vec::new();
    for (region, stored) in store.list_current_regions(false)? {
        let args = match stored {
            Some(stored) => stored,
            None => match lookup(&region) {
                Some(args) => args,
                None => continue,
            },
        };
        entries.push(ConfigEntry { region, args });
    }
    Ok(entries)
}

/// Composes the baseline file written when every class is already solved:
/// stored configurations are applied regardless of the seen flag. A run
/// with nothing to apply still produces one placeholder entry, since the
/// compiler treats a missing file as an error.
pub fn compose_baseline(store: &CodeRegionStore) -> Result<Vec<ConfigEntry>> {
    let mut entries = Vec::new();
    for (region, stored) in store.list_current_regions(true)? {
        if let Some(args) = stored {
            entries.push(ConfigEntry { region, args });
        }
    }
    if entries.is_empty() {
        entries.push(dummy_entry());
    }
    Ok(entries)
}

fn dummy_entry() -> ConfigEntry {
    ConfigEntry {
        region: CodeRegion::new("dummy", "dummy_pass", "dummy_function", RegionType::Other, "0", 0),
        args: ParamAssignment::new(),
    }
}

/// Path for trial `index` of a batch of `total`. Single-trial batches use
/// the base path unchanged; larger batches insert `-{index}` before the
/// extension.
pub fn trial_input_path(base: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return base.to_path_buf();
    }
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
    let name = match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{index}.{ext}"),
        None => format!("{stem}-{index}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{ParamValue, TunableParam};

    fn loop_region(name: &str, func: &str, hash: &str) -> CodeRegion {
        CodeRegion::new(name, "loop-unroll", func, RegionType::Loop, hash, 0)
    }

    fn unroll_task(id: u32, region: CodeRegion) -> Task {
        let params =
            vec![TunableParam::new(id, "UnrollCount", ParamDomain::IntRange { min: 0, max: 8 })];
        Task::new(id, region, params)
    }

    #[test]
    fn test_task_args_translates_flattened_names() {
        let task = unroll_task(14, loop_region("for.body", "main", "caf3"));
        let mut config = Configuration::new();
        config.insert("14UnrollCount".to_string(), ParamValue::Int(4));
        config.insert("15UnrollCount".to_string(), ParamValue::Int(2));

        let args = task_args(&task, &config);
        assert_eq!(args.len(), 1);
        assert_eq!(args["UnrollCount"], ParamValue::Int(4));
    }

    #[test]
    fn test_compose_entries_expands_class_to_all_occurrences() {
        let mut store = CodeRegionStore::in_memory().unwrap();
        let first = loop_region("for.body", "main", "caf3");
        let second = loop_region("for.body", "helper", "caf3");
        store.record_region(&first, false).unwrap();
        store.record_region(&second, false).unwrap();

        let mut task_map = TaskMap::new();
        task_map.insert(1, unroll_task(1, first));
        let mut config = Configuration::new();
        config.insert("1UnrollCount".to_string(), ParamValue::Int(4));

        let entries = compose_entries(&store, true, &task_map, &config).unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.args["UnrollCount"], ParamValue::Int(4));
        }
    }

    #[test]
    fn test_compose_entries_prefers_stored_params_for_seen_rows() {
        let mut store = CodeRegionStore::in_memory().unwrap();
        let solved = loop_region("while.cond", "main", "beef");
        let mut stored = ParamAssignment::new();
        stored.insert("UnrollCount".to_string(), ParamValue::Int(7));
        store.upsert_optimal("beef", RegionType::Loop, "loop-unroll", &stored).unwrap();
        store.record_region(&solved, true).unwrap();

        let tuned = loop_region("for.body", "main", "caf3");
        store.record_region(&tuned, false).unwrap();
        let mut task_map = TaskMap::new();
        task_map.insert(1, unroll_task(1, tuned));
        let mut config = Configuration::new();
        config.insert("1UnrollCount".to_string(), ParamValue::Int(2));

        let entries = compose_entries(&store, true, &task_map, &config).unwrap();
        assert_eq!(entries.len(), 2);
        let by_hash = |hash: &str| {
            entries.iter().find(|e| e.region.hash == hash).unwrap().args["UnrollCount"].clone()
        };
        assert_eq!(by_hash("beef"), ParamValue::Int(7));
        assert_eq!(by_hash("caf3"), ParamValue::Int(2));
    }

    #[test]
    fn test_compose_entries_without_hash_matching_is_per_task() {
        let store = CodeRegionStore::in_memory().unwrap();
        let mut task_map = TaskMap::new();
        task_map.insert(1, unroll_task(1, loop_region("for.body", "main", "caf3")));
        task_map.insert(2, unroll_task(2, loop_region("for.body", "helper", "caf3")));
        let mut config = Configuration::new();
        config.insert("1UnrollCount".to_string(), ParamValue::Int(1));
        config.insert("2UnrollCount".to_string(), ParamValue::Int(2));

        let entries = compose_entries(&store, false, &task_map, &config).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].args["UnrollCount"], ParamValue::Int(1));
        assert_eq!(entries[1].args["UnrollCount"], ParamValue::Int(2));
    }

    #[test]
    fn test_compose_baseline_applies_stored_params_to_unseen_rows() {
        let mut store = CodeRegionStore::in_memory().unwrap();
        let mut stored = ParamAssignment::new();
        stored.insert("UnrollCount".to_string(), ParamValue::Int(7));
        store.upsert_optimal("caf3", RegionType::Loop, "loop-unroll", &stored).unwrap();
        store.record_region(&loop_region("for.body", "main", "caf3"), false).unwrap();

        let entries = compose_baseline(&store).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].args["UnrollCount"], ParamValue::Int(7));
    }

    #[test]
    fn test_compose_baseline_degenerates_to_dummy_entry() {
        let store = CodeRegionStore::in_memory().unwrap();
        let entries = compose_baseline(&store).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].region.name, "dummy");
        assert_eq!(entries[0].region.region_type, RegionType::Other);
        assert!(entries[0].args.is_empty());
    }

    #[test]
    fn test_trial_input_path_suffixes_multi_trial_batches() {
        let base = Path::new("/run/input.json");
        assert_eq!(trial_input_path(base, 0, 1), PathBuf::from("/run/input.json"));
        assert_eq!(trial_input_path(base, 0, 3), PathBuf::from("/run/input-0.json"));
        assert_eq!(trial_input_path(base, 2, 3), PathBuf::from("/run/input-2.json"));
        assert_eq!(trial_input_path(Path::new("/run/input"), 1, 2), PathBuf::from("/run/input-1"));
    }

    #[test]
    fn test_json_writer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        let mut args = ParamAssignment::new();
        args.insert("UnrollCount".to_string(), ParamValue::Int(4));
        let entries =
            vec![ConfigEntry { region: loop_region("for.body", "main", "caf3"), args }];

        JsonInputWriter.write(&path, &entries).unwrap();
        let parsed: Vec<ConfigEntry> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, entries);
    }
}
