use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{
    ObserveFailedSnafu, ReadFailedSnafu, RemoteResult, RemoveFailedSnafu, WriteFailedSnafu,
};
use crate::path::TreePath;
use crate::tree::{RemoteTree, Snapshot, TreeSubscription};

struct Watcher {
    path: TreePath,
    snapshots: mpsc::UnboundedSender<Snapshot>,
}

type WatcherTable = Mutex<HashMap<u64, Watcher>>;

/// In-memory [`RemoteTree`] used by unit tests and the QA runner.
///
/// Semantics follow the production store: point writes create intermediate
/// objects, removes prune parents that became empty, and every watcher whose
/// path intersects a mutation receives the full new value of its subtree.
#[derive(Default)]
pub struct MemoryTree {
    root: Mutex<Value>,
    watchers: Arc<WatcherTable>,
    next_watcher_id: AtomicU64,
    fail_next_write: AtomicBool,
    fail_next_read: AtomicBool,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `write` or `remove` fail with a `WriteFailed`/`RemoveFailed` error.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Makes the next `read` fail with a `ReadFailed` error.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// Number of live listener registrations; teardown tests assert this drops to zero.
    pub fn watcher_count(&self) -> usize {
        lock(&self.watchers).len()
    }

    fn notify(&self, touched: &TreePath) {
        let root = lock(&self.root);
        let mut watchers = lock(&self.watchers);

        watchers.retain(|id, watcher| {
            if !touched.intersects(&watcher.path) {
                return true;
            }

            let snapshot = value_at(&root, watcher.path.segments());
            if watcher.snapshots.send(snapshot).is_ok() {
                true
            } else {
                // Receiver dropped without an explicit stop; reap the registration.
                tracing::debug!(watcher_id = id, path = %watcher.path, "dropping dead watcher");
                false
            }
        });
    }
}

impl RemoteTree for MemoryTree {
    fn write(&self, path: &TreePath, record: Snapshot) -> BoxFuture<'_, RemoteResult<()>> {
        let path = path.clone();
        Box::pin(async move {
            if self.fail_next_write.swap(false, Ordering::SeqCst) {
                return WriteFailedSnafu {
                    stage: "memory-write-fault",
                    path: path.to_string(),
                }
                .fail();
            }

            {
                let mut root = lock(&self.root);
                set_at(&mut root, path.segments(), record);
            }
            self.notify(&path);
            Ok(())
        })
    }

    fn read(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<Snapshot>> {
        let path = path.clone();
        Box::pin(async move {
            if self.fail_next_read.swap(false, Ordering::SeqCst) {
                return ReadFailedSnafu {
                    stage: "memory-read-fault",
                    path: path.to_string(),
                }
                .fail();
            }

            let root = lock(&self.root);
            Ok(value_at(&root, path.segments()))
        })
    }

    fn remove(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<()>> {
        let path = path.clone();
        Box::pin(async move {
            if self.fail_next_write.swap(false, Ordering::SeqCst) {
                return RemoveFailedSnafu {
                    stage: "memory-remove-fault",
                    path: path.to_string(),
                }
                .fail();
            }

            {
                let mut root = lock(&self.root);
                remove_at(&mut root, path.segments());
                if root.as_object().is_some_and(Map::is_empty) {
                    *root = Value::Null;
                }
            }
            self.notify(&path);
            Ok(())
        })
    }

    fn observe(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<TreeSubscription>> {
        let path = path.clone();
        Box::pin(async move {
            let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
            let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);

            // Listeners fire once with the current value before any mutation
            // arrives. The snapshot and the registration happen under the
            // root lock, so no write can land between them unseen; the
            // root -> watchers order matches `notify`.
            {
                let root = lock(&self.root);
                let initial = value_at(&root, path.segments());
                if snapshot_tx.send(initial).is_err() {
                    return ObserveFailedSnafu {
                        stage: "memory-observe-initial",
                        path: path.to_string(),
                    }
                    .fail();
                }
                lock(&self.watchers).insert(
                    id,
                    Watcher {
                        path: path.clone(),
                        snapshots: snapshot_tx,
                    },
                );
            }

            let table = Arc::downgrade(&self.watchers);
            let detach = move || {
                if let Some(table) = table.upgrade() {
                    lock(&table).remove(&id);
                }
            };
            Ok(TreeSubscription::new(path, snapshot_rx, detach))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn value_at(root: &Value, segments: &[String]) -> Value {
    let mut node = root;
    for segment in segments {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    // A point write through a scalar replaces it with an object, last write wins.
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
}

fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    let Some(map) = node.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        map.remove(head);
        return;
    }
    if let Some(child) = map.get_mut(head) {
        remove_at(child, rest);
        let pruned = child.is_null() || child.as_object().is_some_and(Map::is_empty);
        if pruned {
            map.remove(head);
        }
    }
}
