//! Keyed storage abstraction
//!
//! Each component owns one collection behind `Store<K, V>`. Methods return
//! boxed futures so stores can be shared as `Arc<dyn Store<K, V>>` and the
//! backend swapped without touching the components above it.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use crate::error::Result;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Keyed collection with get/set/delete/list.
///
/// `delete` returns the removed value, which makes it an atomic take: two
/// concurrent deletes of the same key see `Some` at most once.
pub trait Store<K, V>: Send + Sync {
    fn get<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>>;

    /// Insert or replace.
    fn set(&self, key: K, value: V) -> StoreFuture<'_, ()>;

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>>;

    /// All entries in ascending key order.
    fn list(&self) -> StoreFuture<'_, Vec<(K, V)>>;
}

/// Process-local store. Reads run concurrently, writes are serialized.
pub struct MemoryStore<K, V> {
    entries: RwLock<BTreeMap<K, V>>,
}

impl<K: Ord, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn set(&self, key: K, value: V) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.entries.write().await.insert(key, value);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<V>> {
        Box::pin(async move { Ok(self.entries.write().await.remove(key)) })
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
