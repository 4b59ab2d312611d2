//! Cross-task knowledge store.
//!
//! A [`KnowledgeStore`] is a namespaced view over a [`KnowledgeBackend`],
//! which only knows how to get, set and delete JSON values by string key.
//! Entries outlive the container task that wrote them; with
//! [`FileBackend`] they also survive process restarts.
//!
//! Concurrent writers are tolerated: every write is a full replacement of one
//! key, so the last write wins.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A persisted fact.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KnowledgeEntry {
    /// Key within the store's namespace.
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// RFC 3339 time of the last write.
    pub timestamp: String,
}

/// Raw key/value persistence.
pub trait KnowledgeBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String>;
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String>;
    fn delete(&self, key: &str) -> Result<bool, String>;
    fn keys(&self) -> Result<Vec<String>, String>;
}

// ── Backends ───────────────────────────────────────────────────────

/// Process-local backend, used in tests and when no file is configured.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnowledgeBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().cloned().collect())
    }
}

/// JSON-object file backend. Every write rewrites the file atomically
/// (temp file + rename).
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<serde_json::Map<String, serde_json::Value>, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(serde_json::Map::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| format!("Failed to parse {}: {e}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
            Err(e) => Err(format!("Failed to read {}: {e}", self.path.display())),
        }
    }

    fn store(&self, map: &serde_json::Map<String, serde_json::Value>) -> Result<(), String> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(map)
            .map_err(|e| format!("Failed to serialize knowledge: {e}"))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, text)
            .map_err(|e| format!("Failed to write {}: {e}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("Failed to rename knowledge file: {e}"))
    }
}

impl KnowledgeBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load()?;
        map.insert(key.to_string(), value);
        self.store(&map)
    }

    fn delete(&self, key: &str) -> Result<bool, String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load()?;
        let removed = map.remove(key).is_some();
        if removed {
            self.store(&map)?;
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.keys().cloned().collect())
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Filters for [`KnowledgeStore::query`]. Empty filters match everything.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeQuery {
    pub key: Option<String>,
    pub prefix: Option<String>,
    /// Entries must carry every listed tag.
    pub tags: Vec<String>,
}

/// Namespaced view over a shared backend. Cheap to clone.
#[derive(Clone)]
pub struct KnowledgeStore {
    backend: Arc<dyn KnowledgeBackend>,
    namespace: String,
}

impl KnowledgeStore {
    pub fn new(backend: Arc<dyn KnowledgeBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// An in-memory store, mainly for tests.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// Write (or overwrite) an entry and return it.
    pub fn gain(
        &self,
        key: &str,
        value: serde_json::Value,
        tags: Vec<String>,
    ) -> Result<KnowledgeEntry, String> {
        let entry = KnowledgeEntry {
            key: key.to_string(),
            value,
            tags,
            timestamp: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_value(&entry).map_err(|e| e.to_string())?;
        self.backend.set(&self.full_key(key), raw)?;
        debug!(namespace = %self.namespace, key, "Stored knowledge entry");
        Ok(entry)
    }

    pub fn get(&self, key: &str) -> Result<Option<KnowledgeEntry>, String> {
        match self.backend.get(&self.full_key(key))? {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| format!("Corrupt knowledge entry '{key}': {e}")),
            None => Ok(None),
        }
    }

    pub fn forget(&self, key: &str) -> Result<bool, String> {
        self.backend.delete(&self.full_key(key))
    }

    /// Entries in this namespace matching `query`, sorted by key.
    pub fn query(&self, query: &KnowledgeQuery) -> Result<Vec<KnowledgeEntry>, String> {
        if let Some(key) = &query.key {
            return Ok(self
                .get(key)?
                .into_iter()
                .filter(|e| query.tags.iter().all(|t| e.tags.contains(t)))
                .collect());
        }

        let ns_prefix = format!("{}:", self.namespace);
        let mut out = Vec::new();
        for full_key in self.backend.keys()? {
            let Some(key) = full_key.strip_prefix(&ns_prefix) else {
                continue;
            };
            if let Some(prefix) = &query.prefix
                && !key.starts_with(prefix.as_str())
            {
                continue;
            }
            // Skip entries that vanished or fail to parse.
            let Ok(Some(entry)) = self.get(key) else {
                continue;
            };
            if query.tags.iter().all(|t| entry.tags.contains(t)) {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gain_and_get_round_trip() {
        let store = KnowledgeStore::in_memory("proj");
        store.gain("build", json!("cargo build"), vec![]).unwrap();
        let entry = store.get("build").unwrap().unwrap();
        assert_eq!(entry.value, json!("cargo build"));
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.timestamp).is_ok());
    }

    #[test]
    fn namespaces_are_isolated() {
        let backend: Arc<dyn KnowledgeBackend> = Arc::new(MemoryBackend::new());
        let a = KnowledgeStore::new(backend.clone(), "a");
        let b = KnowledgeStore::new(backend, "b");
        a.gain("k", json!(1), vec![]).unwrap();
        assert!(b.get("k").unwrap().is_none());
        assert!(b.query(&KnowledgeQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn query_filters_by_prefix_and_tags() {
        let store = KnowledgeStore::in_memory("p");
        store
            .gain("test.cmd", json!("cargo test"), vec!["rust".into()])
            .unwrap();
        store
            .gain("test.flaky", json!(["net"]), vec!["rust".into(), "flaky".into()])
            .unwrap();
        store.gain("deploy", json!("make"), vec![]).unwrap();

        let q = KnowledgeQuery {
            prefix: Some("test.".into()),
            ..Default::default()
        };
        let keys: Vec<_> = store.query(&q).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["test.cmd", "test.flaky"]);

        let q = KnowledgeQuery {
            tags: vec!["flaky".into()],
            ..Default::default()
        };
        let hits = store.query(&q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "test.flaky");
    }

    #[test]
    fn last_write_wins_and_forget() {
        let store = KnowledgeStore::in_memory("p");
        store.gain("k", json!(1), vec![]).unwrap();
        store.gain("k", json!(2), vec![]).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap().value, json!(2));
        assert!(store.forget("k").unwrap());
        assert!(!store.forget("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("knowledge.json");
        {
            let store = KnowledgeStore::new(Arc::new(FileBackend::new(&path)), "proj");
            store.gain("lang", json!("rust"), vec!["meta".into()]).unwrap();
        }
        let store = KnowledgeStore::new(Arc::new(FileBackend::new(&path)), "proj");
        let entry = store.get("lang").unwrap().unwrap();
        assert_eq!(entry.value, json!("rust"));
        assert_eq!(entry.tags, vec!["meta".to_string()]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn file_backend_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        std::fs::write(&path, "not json").unwrap();
        let backend = FileBackend::new(&path);
        assert!(backend.get("x").unwrap_err().contains("Failed to parse"));
    }
}
