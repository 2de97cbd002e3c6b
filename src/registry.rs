use log::{debug, error, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

pub const TEST_HYPERVOLUME: &str = "test hypervolume";
pub const CROSS_HYPERVOLUME: &str = "cross hypervolume";
pub const INNER_CV_HYPERVOLUME: &str = "inner CV hypervolume";
pub const MEAN_JACCARD: &str = "mean Jaccard";
pub const STABILITY_WEIGHT_OVERLAP: &str = "stability by weight overlap";
pub const STABILITY_DICE: &str = "stability by Dice";
pub const STABILITY_BEST_DICE: &str = "stability by best Dice";
pub const PERFORMANCE_GAP: &str = "performance gap";
pub const PERFORMANCE_ERROR: &str = "performance error";
pub const PARETO_DELTA: &str = "Pareto delta";
pub const EXTERNAL_HYPERVOLUME: &str = "external hypervolume";
pub const EXTERNAL_PARETO_DELTA: &str = "external Pareto delta";

const BASE_KEYS: [&str; 12] = [
    TEST_HYPERVOLUME,
    CROSS_HYPERVOLUME,
    INNER_CV_HYPERVOLUME,
    MEAN_JACCARD,
    STABILITY_WEIGHT_OVERLAP,
    STABILITY_DICE,
    STABILITY_BEST_DICE,
    PERFORMANCE_GAP,
    PERFORMANCE_ERROR,
    PARETO_DELTA,
    EXTERNAL_HYPERVOLUME,
    EXTERNAL_PARETO_DELTA,
];

/// The `… folds` companion of a scalar key, holding the per-fold list the
/// scalar was aggregated from.
pub fn folds_key(key: &str) -> String {
    format!("{} folds", key)
}

fn is_known_key(key: &str) -> bool {
    BASE_KEYS.contains(&key) || BASE_KEYS.iter().any(|base| key == folds_key(base))
}

/// A JSON-backed store of computed quality measures for one hall-of-fame
/// directory.
///
/// The key vocabulary is closed; every write replaces the whole document on
/// disk. Not safe to share between concurrent processes. In best-effort
/// mode persistence failures are logged and the in-memory value survives;
/// strict mode propagates them.
#[derive(Debug)]
pub struct ValidationRegistry {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
    best_effort: bool,
}

impl ValidationRegistry {
    pub fn open<P: AsRef<Path>>(path: P, best_effort: bool) -> Result<ValidationRegistry, Box<dyn Error>> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(Box::<dyn Error>::from)
                .and_then(|text| serde_json::from_str(&text).map_err(Into::into))
            {
                Ok(entries) => entries,
                Err(e) if best_effort => {
                    warn!("unreadable registry {}: {}; starting fresh", path.display(), e);
                    BTreeMap::new()
                }
                Err(e) => return Err(e),
            }
        } else {
            BTreeMap::new()
        };
        Ok(ValidationRegistry {
            path,
            entries,
            best_effort,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_f64)
    }

    /// Store a value and persist the whole document.
    ///
    /// # Panics
    /// Panics on a key outside the registry vocabulary.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), Box<dyn Error>> {
        assert!(is_known_key(key), "unknown registry key '{}'", key);
        self.entries.insert(key.to_string(), value);
        self.persist()
    }

    /// Read-through access: a cached value is returned as-is, a missing one
    /// is computed, stored and persisted.
    pub fn get_or_compute<F>(&mut self, key: &str, compute: F) -> Result<Value, Box<dyn Error>>
    where
        F: FnOnce() -> Result<Value, Box<dyn Error>>,
    {
        if let Some(value) = self.entries.get(key) {
            debug!("registry hit for '{}'", key);
            return Ok(value.clone());
        }
        let value = compute()?;
        self.set(key, value.clone())?;
        Ok(value)
    }

    fn persist(&self) -> Result<(), Box<dyn Error>> {
        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(Box::<dyn Error>::from)
            .and_then(|text| std::fs::write(&self.path, text).map_err(Into::into));
        match result {
            Ok(()) => Ok(()),
            Err(e) if self.best_effort => {
                error!("cannot persist registry {}: {}", self.path.display(), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
