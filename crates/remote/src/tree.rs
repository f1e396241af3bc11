use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::RemoteResult;
use crate::path::TreePath;

/// Full current value of a subtree. `Null` means the node is absent.
pub type Snapshot = serde_json::Value;

/// Contract for the hierarchical remote store.
///
/// `observe` delivers the observed subtree's complete value, never a delta:
/// once immediately at registration and again after every mutation that
/// intersects the observed path.
pub trait RemoteTree: Send + Sync {
    fn write(&self, path: &TreePath, record: Snapshot) -> BoxFuture<'_, RemoteResult<()>>;
    fn read(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<Snapshot>>;
    fn remove(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<()>>;
    fn observe(&self, path: &TreePath) -> BoxFuture<'_, RemoteResult<TreeSubscription>>;
}

/// Live listener registration returned by [`RemoteTree::observe`].
///
/// The owner must call [`TreeSubscription::stop`] on every teardown path;
/// dropping the handle stops it as well, so an early return cannot leak a
/// permanent registration.
pub struct TreeSubscription {
    path: TreePath,
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl TreeSubscription {
    pub fn new(
        path: TreePath,
        snapshots: mpsc::UnboundedReceiver<Snapshot>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path,
            snapshots,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn path(&self) -> &TreePath {
        &self.path
    }

    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.snapshots.try_recv().ok()
    }

    /// Deregisters the listener. Returns false when already stopped.
    pub fn stop(&mut self) -> bool {
        match self.detach.take() {
            Some(detach) => {
                detach();
                true
            }
            None => false,
        }
    }
}

impl Drop for TreeSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}
