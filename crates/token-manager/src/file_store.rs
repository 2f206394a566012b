//! JSON file backed store
//!
//! One file per collection, holding a JSON object keyed by id or state token.
//! The file is loaded once on open and rewritten on every mutation using an
//! atomic temp-file + rename, so a crash mid-write leaves the previous
//! contents intact. Writes hold the write lock for the duration of the disk
//! write, which serializes them; reads only clone from memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{Store, StoreFuture};

/// Store persisted to a single JSON file.
pub struct JsonFileStore<K, V> {
    path: PathBuf,
    entries: RwLock<BTreeMap<K, V>>,
}

impl<K, V> JsonFileStore<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Load the collection from `path`.
    ///
    /// A missing file is created as `{}` so later opens skip the cold-start
    /// path.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let entries = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Storage(format!("checking {}: {e}", path.display())))?
        {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
            let entries: BTreeMap<K, V> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), entries = entries.len(), "loaded store");
            entries
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<K, V> Store<K, V> for JsonFileStore<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn set(&self, key: K, value: V) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let previous = entries.insert(key.clone(), value);
            if let Err(e) = write_atomic(&self.path, &*entries).await {
                // Keep memory in step with disk
                match previous {
                    Some(v) => entries.insert(key, v),
                    None => entries.remove(&key),
                };
                return Err(e);
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let removed = entries.remove(key);
            if let Some(value) = &removed {
                if let Err(e) = write_atomic(&self.path, &*entries).await {
                    entries.insert(key.clone(), value.clone());
                    return Err(e);
                }
            }
            Ok(removed)
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<(K, V)>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }
}

/// Write a collection to `path` atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the collections hold client secrets and tokens.
async fn write_atomic<K, V>(path: &Path, data: &BTreeMap<K, V>) -> Result<()>
where
    K: Serialize + Ord,
    V: Serialize,
{
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("store"));

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing {}: {e}", tmp_path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting permissions on {}: {e}", tmp_path.display())))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming into {}: {e}", path.display())))?;

    debug!(path = %path.display(), entries = data.len(), "persisted store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateways.json");

        assert!(!path.exists());
        let store: JsonFileStore<u64, String> = JsonFileStore::open(path.clone()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<u64, String> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn roundtrip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issued_tokens.json");

        let store: JsonFileStore<u64, String> = JsonFileStore::open(path.clone()).await.unwrap();
        store.set(1, "tok1".into()).await.unwrap();
        store.set(2, "tok2".into()).await.unwrap();
        store.delete(&1).await.unwrap();

        let reopened: JsonFileStore<u64, String> = JsonFileStore::open(path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec![(2, "tok2".to_string())]);
    }

    #[tokio::test]
    async fn string_keys_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_states.json");

        let store: JsonFileStore<String, u64> = JsonFileStore::open(path.clone()).await.unwrap();
        store.set("state-abc".into(), 42).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"state-abc\""), "got: {contents}");
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateways.json");
        tokio::fs::write(&path, "not json {{").await.unwrap();

        let result: Result<JsonFileStore<u64, String>> = JsonFileStore::open(path).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateways.json");

        let store: JsonFileStore<u64, String> = JsonFileStore::open(path.clone()).await.unwrap();
        store.set(1, "secret".into()).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issued_tokens.json");
        let store: Arc<JsonFileStore<u64, String>> =
            Arc::new(JsonFileStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(i, format!("tok{i}")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 10);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<u64, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
