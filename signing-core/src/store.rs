//! JSON-file-backed durable store abstraction (§4.6).
//!
//! Each semantic container (users, identities, tickets, challenges, backups,
//! audit) is a `PersistentStore<V>` singleton over its own file under
//! `state_dir()`. Every mutating call persists synchronously via
//! write-to-temp-then-rename so a crash never leaves a half-written file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{CoreError, Result};

/// Resolve the state directory from `SIGNING_STATE_DIR`, defaulting to
/// `./signing-state`. Created with `0o700` permissions on Unix.
pub fn state_dir() -> PathBuf {
    let dir = std::env::var("SIGNING_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("signing-state"));

    if !dir.exists() {
        std::fs::create_dir_all(&dir).ok();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).ok();
        }
    }

    dir
}

/// A JSON-file-backed map keyed by string, shared across request tasks.
pub struct PersistentStore<V> {
    path: PathBuf,
    data: RwLock<HashMap<String, V>>,
}

impl<V> PersistentStore<V>
where
    V: serde::Serialize + serde::de::DeserializeOwned + Clone,
{
    /// Open (or create) the store backed by `path`. A truncated or corrupt
    /// file is treated as empty, with a one-shot warning log.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, V>>(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "corrupt store file at load time; starting from empty map"
                    );
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(CoreError::Internal(format!(
                    "failed to read store file {}: {err}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, map: &HashMap<String, V>) -> Result<()> {
        write_atomic(&self.path, map)
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let map = self.data.read().expect("store lock poisoned");
        Ok(map.get(key).cloned())
    }

    pub fn find<F>(&self, predicate: F) -> Result<Option<V>>
    where
        F: Fn(&V) -> bool,
    {
        let map = self.data.read().expect("store lock poisoned");
        Ok(map.values().find(|v| predicate(v)).cloned())
    }

    pub fn values(&self) -> Result<Vec<V>> {
        let map = self.data.read().expect("store lock poisoned");
        Ok(map.values().cloned().collect())
    }

    pub fn insert(&self, key: String, value: V) -> Result<()> {
        let mut map = self.data.write().expect("store lock poisoned");
        map.insert(key, value);
        self.persist(&map)
    }

    /// Insert only if `key` is absent. Returns `false` without writing if present.
    pub fn insert_if_absent(&self, key: String, value: V) -> Result<bool> {
        let mut map = self.data.write().expect("store lock poisoned");
        if map.contains_key(&key) {
            return Ok(false);
        }
        map.insert(key, value);
        self.persist(&map)?;
        Ok(true)
    }

    /// Atomically find a value matching `predicate`, or insert `make()`'s
    /// result under `key`. Returns `(value, created)`. The whole
    /// find-then-insert sequence happens under a single write lock, so two
    /// concurrent callers racing on the same `predicate` cannot both create
    /// a row.
    pub fn find_or_insert_with<F, M>(&self, predicate: F, key: String, make: M) -> Result<(V, bool)>
    where
        F: Fn(&V) -> bool,
        M: FnOnce() -> V,
    {
        let mut map = self.data.write().expect("store lock poisoned");
        if let Some(existing) = map.values().find(|v| predicate(v)) {
            return Ok((existing.clone(), false));
        }
        let value = make();
        map.insert(key, value.clone());
        self.persist(&map)?;
        Ok((value, true))
    }

    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        let mut map = self.data.write().expect("store lock poisoned");
        let removed = map.remove(key);
        if removed.is_some() {
            self.persist(&map)?;
        }
        Ok(removed)
    }

    /// Apply `f` to the value at `key` if present, then persist. Returns
    /// whether a value was found and updated.
    pub fn update<F>(&self, key: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut V),
    {
        let mut map = self.data.write().expect("store lock poisoned");
        match map.get_mut(key) {
            Some(value) => {
                f(value);
                self.persist(&map)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every entry matching `predicate`, persisting once.
    pub fn retain<F>(&self, predicate: F) -> Result<()>
    where
        F: Fn(&V) -> bool,
    {
        let mut map = self.data.write().expect("store lock poisoned");
        map.retain(|_, v| predicate(v));
        self.persist(&map)
    }
}

/// Serialize `map` to JSON and atomically replace the file at `path`:
/// write to a sibling temp file, flush, then rename over the target.
fn write_atomic<V: serde::Serialize>(path: &Path, map: &HashMap<String, V>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CoreError::Internal(format!("failed to create temp file: {e}")))?;
    let json = serde_json::to_vec_pretty(map)
        .map_err(|e| CoreError::Internal(format!("failed to serialize store: {e}")))?;
    tmp.write_all(&json)
        .map_err(|e| CoreError::Internal(format!("failed to write temp file: {e}")))?;
    tmp.flush()
        .map_err(|e| CoreError::Internal(format!("failed to flush temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| CoreError::Internal(format!("failed to rename temp file into place: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Thing {
        value: u32,
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store: PersistentStore<Thing> = PersistentStore::open(dir.path().join("t.json")).unwrap();
        store.insert("a".into(), Thing { value: 1 }).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Thing { value: 1 }));
        store.update("a", |t| t.value = 2).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Thing { value: 2 }));
        assert_eq!(store.remove("a").unwrap(), Some(Thing { value: 2 }));
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn reopens_persisted_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        {
            let store: PersistentStore<Thing> = PersistentStore::open(path.clone()).unwrap();
            store.insert("a".into(), Thing { value: 7 }).unwrap();
        }
        let reopened: PersistentStore<Thing> = PersistentStore::open(path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), Some(Thing { value: 7 }));
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, b"not json").unwrap();
        let store: PersistentStore<Thing> = PersistentStore::open(path).unwrap();
        assert!(store.values().unwrap().is_empty());
    }

    #[test]
    fn insert_if_absent_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store: PersistentStore<Thing> =
            PersistentStore::open(dir.path().join("t.json")).unwrap();
        assert!(store.insert_if_absent("a".into(), Thing { value: 1 }).unwrap());
        assert!(!store.insert_if_absent("a".into(), Thing { value: 2 }).unwrap());
        assert_eq!(store.get("a").unwrap(), Some(Thing { value: 1 }));
    }
}
