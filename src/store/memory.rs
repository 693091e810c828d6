use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{RemoteStore, StoreError};

/// Process-local document tree with the same semantics as the remote store.
///
/// Used for dry runs (optionally seeded from a JSON file) and as the store
/// fake in tests. `set_offline(true)` makes every call fail as if the network
/// were down.
#[derive(Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    offline: AtomicBool,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Walk to `path`, creating empty objects along the way.
fn node_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut node = root;
    for segment in segments(path) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .map(|obj| obj.entry(segment.to_string()).or_insert(Value::Null))
            .expect("node was just made an object");
    }
    node
}

/// Remove empty objects and nulls left behind by deletes.
fn prune(value: &mut Value) {
    if let Value::Object(obj) = value {
        for child in obj.values_mut() {
            prune(child);
        }
        obj.retain(|_, v| !v.is_null() && !matches!(v, Value::Object(o) if o.is_empty()));
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            root: Mutex::new(value),
            offline: AtomicBool::new(false),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_value(serde_json::from_str(&content)?))
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.root.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn read(&self, path: &str) -> Option<Value> {
        let root = self.root.lock().unwrap();
        let mut node = &*root;
        for segment in segments(path) {
            node = node.get(segment)?;
        }
        match node {
            Value::Null => None,
            value => Some(value.clone()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        Ok(self.read(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_online()?;
        let mut root = self.root.lock().unwrap();
        *node_mut(&mut root, path) = value;
        prune(&mut root);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut root = self.root.lock().unwrap();
        let node = node_mut(&mut root, path);
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(obj) = node {
            for (key, value) in fields {
                obj.insert(key, value);
            }
        }
        prune(&mut root);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        self.check_online()?;
        // v7 ids sort by creation time, like the keys the real store generates.
        let key = Uuid::now_v7().simple().to_string();
        let mut root = self.root.lock().unwrap();
        *node_mut(&mut root, &format!("{}/{}", path, key)) = value;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_and_delete() {
        let store = MemoryStore::new();
        store.set("a/b/c", json!(5)).await.unwrap();
        assert_eq!(store.get("a/b/c").await.unwrap(), Some(json!(5)));
        assert_eq!(store.get("/a/b/").await.unwrap(), Some(json!({"c": 5})));

        store.set("a/b/c", Value::Null).await.unwrap();
        assert_eq!(store.get("a/b/c").await.unwrap(), None);
        assert_eq!(store.snapshot(), json!({}));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = MemoryStore::from_value(json!({"state": {"status": "Idle", "keep": 1}}));
        let mut fields = Map::new();
        fields.insert("status".into(), json!("Running"));
        fields.insert("detail".into(), json!("Syncing"));
        store.update("state", fields).await.unwrap();

        assert_eq!(
            store.get("state").await.unwrap(),
            Some(json!({"status": "Running", "detail": "Syncing", "keep": 1}))
        );
    }

    #[tokio::test]
    async fn push_generates_distinct_keys() {
        let store = MemoryStore::new();
        let first = store.push("logs", json!({"n": 1})).await.unwrap();
        let second = store.push("logs", json!({"n": 2})).await.unwrap();
        assert_ne!(first, second);

        let logs = store.get("logs").await.unwrap().unwrap();
        assert_eq!(logs.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("x").await,
            Err(StoreError::Unavailable)
        ));
        assert!(store.set("x", json!(1)).await.is_err());
    }
}
