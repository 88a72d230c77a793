// src/store.rs
// STANCE STORE: key-value persistence for assigned stances
// Keyed by (persona name, topic) so a re-initialized conversation on the same
// topic picks up the stances it had before instead of re-rolling them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::stance::AssignedStance;

pub trait StanceStore: Send + Sync {
    fn get(&self, persona_name: &str, topic: &str) -> EngineResult<Option<AssignedStance>>;
    fn set(&self, persona_name: &str, topic: &str, stance: &AssignedStance) -> EngineResult<()>;
    fn delete(&self, persona_name: &str, topic: &str) -> EngineResult<()>;
}

fn store_key(persona_name: &str, topic: &str) -> String {
    format!("{}::{}", persona_name, topic.trim().to_lowercase())
}

// --- In memory ---

#[derive(Debug, Default)]
pub struct InMemoryStanceStore {
    entries: DashMap<String, AssignedStance>,
}

impl InMemoryStanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StanceStore for InMemoryStanceStore {
    fn get(&self, persona_name: &str, topic: &str) -> EngineResult<Option<AssignedStance>> {
        Ok(self.entries.get(&store_key(persona_name, topic)).map(|e| e.value().clone()))
    }

    fn set(&self, persona_name: &str, topic: &str, stance: &AssignedStance) -> EngineResult<()> {
        self.entries.insert(store_key(persona_name, topic), stance.clone());
        Ok(())
    }

    fn delete(&self, persona_name: &str, topic: &str) -> EngineResult<()> {
        self.entries.remove(&store_key(persona_name, topic));
        Ok(())
    }
}

// --- JSON file ---

/// One JSON document on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStanceStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, AssignedStance>>,
}

impl JsonFileStanceStore {
    /// Opens `path`, loading existing entries. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let cache = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), entries = cache.len(), "stance store opened");
        Ok(Self { path, cache: Mutex::new(cache) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, AssignedStance>) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, HashMap<String, AssignedStance>>> {
        self.cache.lock().map_err(|_| EngineError::Store("stance store lock poisoned".into()))
    }
}

impl StanceStore for JsonFileStanceStore {
    fn get(&self, persona_name: &str, topic: &str) -> EngineResult<Option<AssignedStance>> {
        Ok(self.lock()?.get(&store_key(persona_name, topic)).cloned())
    }

    fn set(&self, persona_name: &str, topic: &str, stance: &AssignedStance) -> EngineResult<()> {
        let mut entries = self.lock()?;
        entries.insert(store_key(persona_name, topic), stance.clone());
        self.flush(&entries)
    }

    fn delete(&self, persona_name: &str, topic: &str) -> EngineResult<()> {
        let mut entries = self.lock()?;
        if entries.remove(&store_key(persona_name, topic)).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stance(position: &str) -> AssignedStance {
        AssignedStance {
            category: "gun_laws".into(),
            stance_key: "pro_control".into(),
            position: position.into(),
            arguments: vec!["Background checks save lives".into()],
            concerns: vec![],
            personal_connections: vec![],
            emotional_investment: 0.8,
        }
    }

    #[test]
    fn test_in_memory_get_set_delete() {
        let store = InMemoryStanceStore::new();
        assert!(store.get("Alice", "gun_laws").unwrap().is_none());
        store.set("Alice", "gun_laws", &stance("Stricter laws")).unwrap();
        assert_eq!(store.get("Alice", "Gun_Laws ").unwrap().unwrap().position, "Stricter laws");
        assert!(store.get("Bob", "gun_laws").unwrap().is_none());
        store.delete("Alice", "gun_laws").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stances.json");
        {
            let store = JsonFileStanceStore::open(&path).unwrap();
            store.set("Alice", "gun_laws", &stance("Stricter laws")).unwrap();
            store.set("Bob", "gun_laws", &stance("Protect ownership")).unwrap();
            store.delete("Bob", "gun_laws").unwrap();
        }
        let reopened = JsonFileStanceStore::open(&path).unwrap();
        assert_eq!(reopened.get("Alice", "gun_laws").unwrap().unwrap().position, "Stricter laws");
        assert!(reopened.get("Bob", "gun_laws").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stances.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonFileStanceStore::open(&path), Err(EngineError::Serde(_))));
    }
}
