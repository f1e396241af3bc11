use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;

use crate::error::{BlobResult, StoreFailedSnafu};

/// Contract for the object-storage collaborator: accepts bytes under a
/// caller-chosen key and returns a durable content URL.
pub trait BlobStore: Send + Sync {
    fn store(&self, bytes: Vec<u8>, key: &str) -> BoxFuture<'_, BlobResult<String>>;
}

/// In-memory [`BlobStore`] for tests and the QA runner.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    // Countdown to an injected failure; 0 means no failure is scheduled.
    stores_until_failure: AtomicI64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules the n-th subsequent `store` call (1-based) to fail; later calls succeed.
    pub fn fail_nth_store(&self, n: i64) {
        self.stores_until_failure.store(n, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, bytes: Vec<u8>, key: &str) -> BoxFuture<'_, BlobResult<String>> {
        let key = key.to_string();
        Box::pin(async move {
            let remaining = self.stores_until_failure.load(Ordering::SeqCst);
            if remaining > 0 {
                self.stores_until_failure.store(remaining - 1, Ordering::SeqCst);
                if remaining == 1 {
                    return StoreFailedSnafu {
                        stage: "memory-blob-fault",
                        key,
                        reason: "injected store failure".to_string(),
                    }
                    .fail();
                }
            }

            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone(), bytes);
            Ok(format!("memory://{key}"))
        })
    }
}
