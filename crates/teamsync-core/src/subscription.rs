use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::paths::StorePath;
use crate::store::Shared;
use crate::tree;

// ---------------------------------------------------------------------------
// SubscriptionId / SnapshotEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The full value of a subscribed subtree after a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEvent {
    pub subscription: SubscriptionId,
    pub path: StorePath,
    /// Store revision that produced this value.
    pub revision: u64,
    /// `None` when nothing exists at `path`.
    pub value: Option<Value>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Entry {
    id: SubscriptionId,
    path: StorePath,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    last: Option<Value>,
}

/// Live registrations, owned by the store and only touched under its lock.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// Register interest in `path` and queue the current value.
    pub(crate) fn register(
        &mut self,
        path: StorePath,
        root: &Value,
        revision: u64,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<SnapshotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        let current = tree::lookup(root, path.segments()).cloned();
        let _ = tx.send(SnapshotEvent {
            subscription: id,
            path: path.clone(),
            revision,
            value: current.clone(),
        });
        self.entries.push(Entry {
            id,
            path,
            tx,
            last: current,
        });
        (id, rx)
    }

    pub(crate) fn deregister(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Push the new value to every registration whose subtree changed.
    pub(crate) fn fan_out(&mut self, root: &Value, revision: u64, touched: &[StorePath]) {
        self.entries.retain_mut(|entry| {
            if !touched.iter().any(|t| t.overlaps(&entry.path)) {
                return true;
            }
            let current = tree::lookup(root, entry.path.segments()).cloned();
            if current == entry.last {
                return true;
            }
            entry.last = current.clone();
            let delivered = entry
                .tx
                .send(SnapshotEvent {
                    subscription: entry.id,
                    path: entry.path.clone(),
                    revision,
                    value: current,
                })
                .is_ok();
            if !delivered {
                tracing::debug!(subscription = %entry.id, "receiver gone, dropping registration");
            }
            delivered
        });
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live registration on one subtree.
///
/// The first event carries the value at subscription time; later events
/// arrive in commit order whenever the subtree changes. Dropping the handle
/// (or calling [`Subscription::unsubscribe`]) releases the registration, after
/// which nothing more can be received from it. The stream ends when the store
/// is closed.
pub struct Subscription {
    id: SubscriptionId,
    path: StorePath,
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    store: Weak<Shared>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        path: StorePath,
        rx: mpsc::UnboundedReceiver<SnapshotEvent>,
        store: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            path,
            rx,
            store,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next event. `None` once the store is closed.
    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(shared) = self.store.upgrade() {
            shared.deregister(self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = SnapshotEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SubscriptionToken (callback form)
// ---------------------------------------------------------------------------

/// Handle for a callback registration made with
/// [`EntityStore::subscribe_fn`](crate::store::EntityStore::subscribe_fn).
///
/// Once [`SubscriptionToken::unsubscribe`] returns (or the token is dropped),
/// the callback is not running and will never run again.
pub struct SubscriptionToken {
    id: SubscriptionId,
    active: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
    store: Weak<Shared>,
}

impl SubscriptionToken {
    pub(crate) fn spawn<F>(mut subscription: Subscription, mut callback: F) -> Self
    where
        F: FnMut(SnapshotEvent) + Send + 'static,
    {
        let id = subscription.id;
        let store = subscription.store.clone();
        let active = Arc::new(Mutex::new(true));
        let flag = active.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                // Held for the whole callback so unsubscribe waits for it.
                let guard = match flag.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !*guard {
                    break;
                }
                callback(event);
            }
        });
        Self {
            id,
            active,
            task,
            store,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&self) {
        {
            let mut guard = match self.active.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = false;
        }
        self.task.abort();
        if let Some(shared) = self.store.upgrade() {
            shared.deregister(self.id);
        }
    }
}

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_queues_current_value() {
        let mut reg = Registry::default();
        let root = json!({"teams": {"t1": {"name": "A"}}});
        let path = StorePath::parse("teams/t1").unwrap();
        let (id, mut rx) = reg.register(path, &root, 7);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.subscription, id);
        assert_eq!(ev.revision, 7);
        assert_eq!(ev.value, Some(json!({"name": "A"})));
    }

    #[test]
    fn fan_out_skips_unrelated_and_unchanged() {
        let mut reg = Registry::default();
        let root = json!({"teams": {"t1": {"name": "A"}, "t2": {"name": "B"}}});
        let (_, mut rx) = reg.register(StorePath::parse("teams/t1").unwrap(), &root, 1);
        rx.try_recv().unwrap();

        let next = json!({"teams": {"t1": {"name": "A"}, "t2": {"name": "C"}}});
        reg.fan_out(&next, 2, &[StorePath::parse("teams/t2/name").unwrap()]);
        assert!(rx.try_recv().is_err());

        // Overlapping write that leaves t1 untouched
        reg.fan_out(&next, 3, &[StorePath::parse("teams").unwrap()]);
        assert!(rx.try_recv().is_err());

        let changed = json!({"teams": {"t1": {"name": "Z"}}});
        reg.fan_out(&changed, 4, &[StorePath::parse("teams/t1/name").unwrap()]);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.revision, 4);
        assert_eq!(ev.value, Some(json!({"name": "Z"})));
    }

    #[test]
    fn fan_out_reports_removal_as_absent() {
        let mut reg = Registry::default();
        let root = json!({"teams": {"t1": {"name": "A"}}});
        let (_, mut rx) = reg.register(StorePath::parse("teams/t1").unwrap(), &root, 1);
        rx.try_recv().unwrap();
        reg.fan_out(&json!({}), 2, &[StorePath::parse("teams/t1").unwrap()]);
        assert_eq!(rx.try_recv().unwrap().value, None);
    }

    #[test]
    fn closed_receivers_are_dropped() {
        let mut reg = Registry::default();
        let root = json!({});
        let (_, rx) = reg.register(StorePath::parse("teams").unwrap(), &root, 0);
        drop(rx);
        reg.fan_out(&json!({"teams": {"t": {"name": "x"}}}), 1, &[StorePath::parse("teams/t").unwrap()]);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn deregister_reports_presence() {
        let mut reg = Registry::default();
        let (id, _rx) = reg.register(StorePath::parse("users").unwrap(), &json!({}), 0);
        assert!(reg.deregister(id));
        assert!(!reg.deregister(id));
    }
}
