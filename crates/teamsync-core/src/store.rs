//! The authoritative entity tree.
//!
//! Every write goes through [`EntityStore::batch`]: the closure stages writes
//! against a working copy of the tree, and on success the whole batch is
//! persisted, published and fanned out to subscribers as one commit. Writes
//! to a path are last-writer-wins; nothing is ever merged below one level.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, TeamSyncError};
use crate::paths::{self, StorePath};
use crate::subscription::{Registry, SnapshotEvent, Subscription, SubscriptionId, SubscriptionToken};
use crate::tree;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    tree: Value,
    revision: u64,
    closed: bool,
    subscribers: Registry,
}

pub(crate) struct Shared {
    data_file: Option<PathBuf>,
    /// Held for the store's lifetime so no other process rewrites the file.
    _lock_file: Option<File>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TeamSyncError::WriteRejected("store lock poisoned".into()))
    }

    pub(crate) fn deregister(&self, id: SubscriptionId) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.subscribers.deregister(id) {
            debug!(subscription = %id, "subscription released");
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Staged writes for one atomic commit.
///
/// Reads see the committed tree plus the writes staged so far.
pub struct Batch {
    working: Value,
    touched: Vec<StorePath>,
}

impl Batch {
    pub fn read(&self, path: &StorePath) -> Option<&Value> {
        tree::lookup(&self.working, path.segments())
    }

    pub fn exists(&self, path: &StorePath) -> bool {
        self.read(path).is_some()
    }

    /// Replace the subtree at `path`. Writing `null` removes it.
    pub fn write(&mut self, path: &StorePath, value: Value) {
        tree::set(&mut self.working, path.segments(), value);
        self.touched.push(path.clone());
    }

    /// One-level merge: each key of `fields` replaces that child of `path`
    /// wholesale; nested objects are not merged.
    pub fn patch(&mut self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        let mut children = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            children.push((path.child(&key)?, value));
        }
        for (child, value) in children {
            self.write(&child, value);
        }
        Ok(())
    }

    /// Remove the subtree at `path`. Returns whether anything was there.
    pub fn remove(&mut self, path: &StorePath) -> bool {
        if !self.exists(path) {
            return false;
        }
        tree::set(&mut self.working, path.segments(), Value::Null);
        self.touched.push(path.clone());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Handle to the entity tree. Cheap to clone; all clones share one tree.
#[derive(Clone)]
pub struct EntityStore {
    shared: Arc<Shared>,
}

impl EntityStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_tree(None, None, Value::Object(Map::new()))
    }

    /// Open a store persisted to `data_file`, loading it if it exists.
    ///
    /// The store takes an exclusive lock next to the data file. A second
    /// `open` of the same file, in this process or another, fails with
    /// `WriteRejected` until the first store is dropped.
    pub fn open(data_file: impl Into<PathBuf>) -> Result<Self> {
        let data_file = data_file.into();
        let lock_file = acquire_lock(&data_file)?;
        let tree = match crate::io::read_if_exists(&data_file)? {
            Some(text) if !text.trim().is_empty() => {
                let value: Value = serde_json::from_str(&text)?;
                if !value.is_object() {
                    return Err(TeamSyncError::Malformed {
                        path: data_file.display().to_string(),
                        reason: "data file must contain a JSON object".into(),
                    });
                }
                tree::prune(value)
            }
            _ => Value::Null,
        };
        let tree = if tree.is_object() {
            tree
        } else {
            Value::Object(Map::new())
        };
        info!(file = %data_file.display(), "opened entity store");
        Ok(Self::with_tree(Some(data_file), Some(lock_file), tree))
    }

    /// Open the store described by `config`, resolving a relative data file
    /// against `root`.
    pub fn from_config(root: &Path, config: &Config) -> Result<Self> {
        match &config.data_file {
            Some(file) if file.is_absolute() => Self::open(file.clone()),
            Some(file) => Self::open(root.join(file)),
            None => Ok(Self::in_memory()),
        }
    }

    fn with_tree(data_file: Option<PathBuf>, lock_file: Option<File>, tree: Value) -> Self {
        Self {
            shared: Arc::new(Shared {
                data_file,
                _lock_file: lock_file,
                inner: Mutex::new(Inner {
                    tree,
                    revision: 0,
                    closed: false,
                    subscribers: Registry::default(),
                }),
            }),
        }
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.shared.data_file.as_deref()
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.shared.lock()?;
        if inner.closed {
            return Err(TeamSyncError::StoreClosed);
        }
        Ok(inner)
    }

    // ---------------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------------

    /// The current value at `path`, or `None` when nothing is there.
    pub fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        let inner = self.lock_open()?;
        Ok(tree::lookup(&inner.tree, path.segments()).cloned())
    }

    pub fn exists(&self, path: &StorePath) -> Result<bool> {
        Ok(self.read(path)?.is_some())
    }

    pub fn revision(&self) -> Result<u64> {
        Ok(self.lock_open()?.revision)
    }

    /// The whole tree, for backups and export.
    pub fn export(&self) -> Result<Value> {
        Ok(self.lock_open()?.tree.clone())
    }

    // ---------------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------------

    /// Run `f` against a working copy of the tree and commit its staged
    /// writes as one unit. If `f` fails, nothing is written.
    pub fn batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Batch) -> Result<T>,
    {
        let mut inner = self.lock_open()?;
        let mut batch = Batch {
            working: inner.tree.clone(),
            touched: Vec::new(),
        };
        let out = f(&mut batch)?;
        if batch.is_empty() {
            return Ok(out);
        }

        if let Some(file) = &self.shared.data_file {
            persist(file, &batch.working)?;
        }

        let Batch { working, touched } = batch;
        inner.tree = working;
        inner.revision += 1;
        let revision = inner.revision;
        let Inner {
            tree, subscribers, ..
        } = &mut *inner;
        subscribers.fan_out(tree, revision, &touched);
        debug!(revision, writes = touched.len(), "committed");
        Ok(out)
    }

    /// Replace the subtree at `path` with `value`.
    pub fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.batch(|b| {
            b.write(path, value);
            Ok(())
        })
    }

    /// One-level merge of `fields` into `path`.
    pub fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.batch(|b| b.patch(path, fields))
    }

    /// Remove the subtree at `path`. `Ok(false)` if it was already absent.
    pub fn remove(&self, path: &StorePath) -> Result<bool> {
        self.batch(|b| Ok(b.remove(path)))
    }

    /// Replace the whole tree. Only `teams` and `users` may appear at the top.
    pub fn import(&self, tree: Value) -> Result<()> {
        let Value::Object(map) = &tree else {
            return Err(TeamSyncError::ValidationFailed(
                "import data must be a JSON object".into(),
            ));
        };
        if let Some(key) = map
            .keys()
            .find(|k| k.as_str() != paths::TEAMS && k.as_str() != paths::USERS)
        {
            return Err(TeamSyncError::ValidationFailed(format!(
                "unexpected top-level key '{key}' in import data"
            )));
        }
        self.batch(|b| {
            b.write(&StorePath::root(), tree);
            Ok(())
        })
    }

    // ---------------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------------

    /// Register interest in `path`. The current value is delivered first.
    pub fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
        let mut inner = self.lock_open()?;
        let revision = inner.revision;
        let Inner {
            tree, subscribers, ..
        } = &mut *inner;
        let (id, rx) = subscribers.register(path.clone(), tree, revision);
        debug!(subscription = %id, path = %path, "subscribed");
        Ok(Subscription::new(
            id,
            path.clone(),
            rx,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Callback form of [`EntityStore::subscribe`]. Needs a tokio runtime.
    pub fn subscribe_fn<F>(&self, path: &StorePath, callback: F) -> Result<SubscriptionToken>
    where
        F: FnMut(SnapshotEvent) + Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TeamSyncError::NoRuntime);
        }
        let subscription = self.subscribe(path)?;
        Ok(SubscriptionToken::spawn(subscription, callback))
    }

    pub fn subscriber_count(&self) -> Result<usize> {
        Ok(self.shared.lock()?.subscribers.len())
    }

    // ---------------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------------

    /// End every subscription and reject further calls.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.shared.lock()?;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.subscribers.clear();
        info!("entity store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().map(|i| i.closed).unwrap_or(true)
    }
}

fn lock_path(data_file: &Path) -> PathBuf {
    let mut name = data_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    data_file.with_file_name(name)
}

fn acquire_lock(data_file: &Path) -> Result<File> {
    let path = lock_path(data_file);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    file.try_lock_exclusive().map_err(|_| {
        TeamSyncError::WriteRejected(format!(
            "{} is in use by another teamsync store (is `teamsync serve` running?)",
            data_file.display()
        ))
    })?;
    Ok(file)
}

fn persist(file: &Path, tree: &Value) -> Result<()> {
    let data = serde_json::to_vec_pretty(tree)?;
    crate::io::atomic_write(file, &data).map_err(|e| {
        TeamSyncError::WriteRejected(format!("could not persist {}: {e}", file.display()))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures::StreamExt;
    use serde_json::json;
    use tempfile::TempDir;

    fn p(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn read_absent_is_none() {
        let store = EntityStore::in_memory();
        assert_eq!(store.read(&p("teams/nope")).unwrap(), None);
    }

    #[test]
    fn write_then_read() {
        let store = EntityStore::in_memory();
        store.write(&p("users/u1"), json!({"name": "Ann", "role": "user"})).unwrap();
        assert_eq!(
            store.read(&p("users/u1/name")).unwrap(),
            Some(json!("Ann"))
        );
    }

    #[test]
    fn patch_replaces_nested_objects_wholesale() {
        let store = EntityStore::in_memory();
        store.write(&p("teams/t/x"), json!({"a": {"c": 2}, "keep": true})).unwrap();
        store.patch(&p("teams/t/x"), obj(json!({"a": {"b": 1}}))).unwrap();
        assert_eq!(
            store.read(&p("teams/t/x")).unwrap(),
            Some(json!({"a": {"b": 1}, "keep": true}))
        );
    }

    #[test]
    fn patch_with_null_removes_key() {
        let store = EntityStore::in_memory();
        store.write(&p("teams/t"), json!({"name": "A", "category": "Sales"})).unwrap();
        store.patch(&p("teams/t"), obj(json!({"category": null}))).unwrap();
        assert_eq!(store.read(&p("teams/t")).unwrap(), Some(json!({"name": "A"})));
    }

    #[test]
    fn patch_rejects_invalid_keys_without_writing() {
        let store = EntityStore::in_memory();
        let err = store.patch(&p("teams/t"), obj(json!({"ok": 1, "bad.key": 2}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(store.read(&p("teams/t")).unwrap(), None);
        assert_eq!(store.revision().unwrap(), 0);
    }

    #[test]
    fn remove_reports_presence() {
        let store = EntityStore::in_memory();
        store.write(&p("teams/t/name"), json!("A")).unwrap();
        assert!(store.remove(&p("teams/t")).unwrap());
        assert!(!store.remove(&p("teams/t")).unwrap());
        assert_eq!(store.read(&p("teams/t/name")).unwrap(), None);
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let store = EntityStore::in_memory();
        let res: Result<()> = store.batch(|b| {
            b.write(&p("teams/t/name"), json!("A"));
            Err(TeamSyncError::ValidationFailed("nope".into()))
        });
        assert!(res.is_err());
        assert_eq!(store.read(&p("teams/t")).unwrap(), None);
        assert_eq!(store.revision().unwrap(), 0);
    }

    #[test]
    fn batch_reads_see_staged_writes() {
        let store = EntityStore::in_memory();
        store
            .batch(|b| {
                b.write(&p("teams/t/name"), json!("A"));
                assert_eq!(b.read(&p("teams/t/name")), Some(&json!("A")));
                Ok(())
            })
            .unwrap();
        assert_eq!(store.revision().unwrap(), 1);
    }

    #[test]
    fn subscription_gets_initial_and_changed_values() {
        let store = EntityStore::in_memory();
        store.write(&p("teams/t/name"), json!("A")).unwrap();
        let mut sub = store.subscribe(&p("teams/t")).unwrap();
        assert_eq!(sub.try_recv().unwrap().value, Some(json!({"name": "A"})));

        store.write(&p("teams/other/name"), json!("B")).unwrap();
        assert!(sub.try_recv().is_none());

        store.write(&p("teams/t/name"), json!("C")).unwrap();
        let ev = sub.try_recv().unwrap();
        assert_eq!(ev.value, Some(json!({"name": "C"})));
        assert_eq!(ev.revision, 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = EntityStore::in_memory();
        let sub = store.subscribe(&p("teams")).unwrap();
        assert_eq!(store.subscriber_count().unwrap(), 1);
        sub.unsubscribe();
        assert_eq!(store.subscriber_count().unwrap(), 0);
        store.write(&p("teams/t/name"), json!("A")).unwrap();
    }

    #[tokio::test]
    async fn callback_subscription_stops_after_unsubscribe() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = EntityStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let counter = calls.clone();
        let token = store
            .subscribe_fn(&p("teams/t"), move |ev| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(ev.value);
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), None);
        store.write(&p("teams/t/name"), json!("A")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(json!({"name": "A"})));

        token.unsubscribe();
        let seen = calls.load(Ordering::SeqCst);
        store.write(&p("teams/t/name"), json!("B")).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert_eq!(store.subscriber_count().unwrap(), 0);
    }

    #[test]
    fn callback_subscription_needs_runtime() {
        let store = EntityStore::in_memory();
        let err = store.subscribe_fn(&p("teams"), |_| {}).unwrap_err();
        assert!(matches!(err, TeamSyncError::NoRuntime));
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_calls() {
        let store = EntityStore::in_memory();
        let mut sub = store.subscribe(&p("teams")).unwrap();
        assert!(sub.next().await.is_some());
        store.close().unwrap();
        assert!(sub.next().await.is_none());
        assert!(matches!(
            store.write(&p("teams/t/name"), json!("A")),
            Err(TeamSyncError::StoreClosed)
        ));
        assert!(store.is_closed());
    }

    #[test]
    fn persisted_store_reopens_with_data() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.json");
        {
            let store = EntityStore::open(&file).unwrap();
            store.write(&p("teams/t/name"), json!("A")).unwrap();
        }
        let store = EntityStore::open(&file).unwrap();
        assert_eq!(store.read(&p("teams/t/name")).unwrap(), Some(json!("A")));
    }

    #[test]
    fn second_open_of_same_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.json");
        let first = EntityStore::open(&file).unwrap();
        first.write(&p("teams/a/name"), json!("A")).unwrap();

        let err = EntityStore::open(&file).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WriteRejected);
        assert!(err.to_string().contains("in use"), "{err}");

        first.write(&p("teams/b/name"), json!("B")).unwrap();
        drop(first);

        let reopened = EntityStore::open(&file).unwrap();
        assert_eq!(reopened.read(&p("teams/a/name")).unwrap(), Some(json!("A")));
        assert_eq!(reopened.read(&p("teams/b/name")).unwrap(), Some(json!("B")));
    }

    #[test]
    fn clones_share_the_lock() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.json");
        let store = EntityStore::open(&file).unwrap();
        let clone = store.clone();
        drop(store);
        assert!(EntityStore::open(&file).is_err());
        drop(clone);
        assert!(EntityStore::open(&file).is_ok());
    }

    #[test]
    fn persistence_failure_is_rejected_and_not_applied() {
        let dir = TempDir::new().unwrap();
        // A directory where the data file should be makes the rename fail.
        let file = dir.path().join("data.json");
        std::fs::create_dir_all(file.join("occupied")).unwrap();
        let store = EntityStore::with_tree(Some(file.clone()), None, Value::Object(Map::new()));
        let mut sub = store.subscribe(&p("teams")).unwrap();
        sub.try_recv().unwrap();

        let err = store.write(&p("teams/t/name"), json!("A")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteRejected);
        assert_eq!(store.read(&p("teams/t")).unwrap(), None);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn import_rejects_unknown_roots() {
        let store = EntityStore::in_memory();
        assert!(store.import(json!({"other": {}})).is_err());
        store
            .import(json!({"users": {"u1": {"name": "Ann", "role": "user"}}}))
            .unwrap();
        assert_eq!(
            store.export().unwrap(),
            json!({"users": {"u1": {"name": "Ann", "role": "user"}}})
        );
    }
}
