// Async wrapper for kvtree migrations
// Runs the blocking store operations on tokio's blocking pool

use std::sync::Arc;

use serde_json::Value;
use tokio::task;

use crate::errors::{KvTreeError, Result};
use crate::migrate;
use crate::store::Store;
use crate::tree::Tree;

fn join_error(e: task::JoinError) -> KvTreeError {
    KvTreeError::TaskFailed { reason: e.to_string() }
}

/// Async facade over a shared store.
/// Each call moves one whole operation onto `spawn_blocking`.
pub struct AsyncKvTree<S> {
    inner: Arc<S>,
}

impl<S> Clone for AsyncKvTree<S> {
    fn clone(&self) -> Self {
        AsyncKvTree {
            inner: self.inner.clone(),
        }
    }
}

impl<S> AsyncKvTree<S>
where
    S: Store + Send + Sync + 'static,
{
    pub fn new(store: S) -> Self {
        AsyncKvTree {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        AsyncKvTree { inner: store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner
    }

    /// Read the subtree below `prefix`
    pub async fn read_prefix(&self, prefix: &str) -> Result<Tree> {
        let store = self.inner.clone();
        let prefix = prefix.to_string();

        task::spawn_blocking(move || migrate::read_prefix(&*store, &prefix))
            .await
            .map_err(join_error)?
    }

    /// Write every leaf of `tree` below `base`
    pub async fn write_tree(&self, tree: Tree, base: &str) -> Result<usize> {
        let store = self.inner.clone();
        let base = base.to_string();

        task::spawn_blocking(move || migrate::write_tree(&*store, &tree, &base))
            .await
            .map_err(join_error)?
    }

    /// Copy the subtree at `from` to `to` within the same store
    pub async fn copy_prefix(&self, from: &str, to: &str) -> Result<usize> {
        let store = self.inner.clone();
        let from = from.to_string();
        let to = to.to_string();

        task::spawn_blocking(move || migrate::copy_prefix(&*store, &*store, &from, &to))
            .await
            .map_err(join_error)?
    }

    /// Import a JSON document below `base`
    pub async fn import_json(&self, document: Value, base: &str) -> Result<usize> {
        let store = self.inner.clone();
        let base = base.to_string();

        task::spawn_blocking(move || migrate::import_json(&*store, &document, &base))
            .await
            .map_err(join_error)?
    }

    /// Export the subtree below `prefix` as a JSON object
    pub async fn export_json(&self, prefix: &str) -> Result<Value> {
        Ok(self.read_prefix(prefix).await?.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore, StoreWriter};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_async_export_import() {
        let kv = AsyncKvTree::new(MemoryStore::new());

        let doc = json!({"db": {"host": "db1", "port": 5432}});
        let written = kv.import_json(doc, "cfg").await.unwrap();
        assert_eq!(written, 2);

        let exported = kv.export_json("cfg").await.unwrap();
        assert_eq!(exported, json!({"db": {"host": "db1", "port": "5432"}}));
    }

    #[tokio::test]
    async fn test_async_copy() {
        let store = MemoryStore::new();
        store.put("src/a/b", b"1").unwrap();
        store.put("src/c", b"2").unwrap();
        let kv = AsyncKvTree::new(store);

        assert_eq!(kv.copy_prefix("src", "dst").await.unwrap(), 2);
        assert_eq!(kv.store().get("dst/a/b"), Some(b"1".to_vec()));
        assert_eq!(kv.store().get("dst/c"), Some(b"2".to_vec()));
        assert_eq!(kv.store().len(), 4);
    }

    #[tokio::test]
    async fn test_async_concurrent_prefixes() {
        let kv = AsyncKvTree::new(MemoryStore::new());

        let mut handles = vec![];
        for i in 0..10 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                let doc = json!({"name": format!("svc{}", i), "port": 8000 + i});
                kv.import_json(doc, &format!("apps/{}", i)).await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        let tree = kv.read_prefix("apps").await.unwrap();
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.leaf_count(), 20);
    }

    #[tokio::test]
    async fn test_async_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.json");
        let kv = AsyncKvTree::new(FileStore::open(&path).unwrap());

        let mut tree = Tree::new();
        tree.insert("x/y", "z".into());
        kv.write_tree(tree, "root").await.unwrap();
        kv.store().flush().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("root/x/y"), Some(b"z".to_vec()));
    }
}
