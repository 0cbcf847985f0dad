//! In-memory secure store implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{SecureStore, StoreError, StoreMethod};

/// In-memory store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
/// Clones share the same blob, so a test can keep a handle while the
/// credential owns another and observe every write.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    data: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store holding an initial blob.
    pub fn with_data(data: Vec<u8>) -> Self {
        let store = Self::new();
        *store.inner.data.lock() = Some(data);
        store
    }

    /// The currently stored blob.
    pub fn data(&self) -> Option<Vec<u8>> {
        self.inner.data.lock().clone()
    }

    /// Number of successful `save` calls.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent loads fail, as a locked or corrupted backend would.
    pub fn set_fail_loads(&self, fail: bool) {
        self.inner.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent saves fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.data.lock().as_ref().map(Vec::len);
        f.debug_struct("MemoryStore")
            .field("bytes", &len)
            .field("writes", &self.write_count())
            .finish()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        if self.inner.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::AccessDenied {
                method: StoreMethod::Memory,
                message: "load disabled".to_string(),
            });
        }
        Ok(self.inner.data.lock().clone())
    }

    async fn save(&self, data: &[u8]) -> Result<(), StoreError> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: "save disabled".to_string(),
            });
        }
        *self.inner.data.lock() = Some(data.to_vec());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn method(&self) -> StoreMethod {
        StoreMethod::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_save_load() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(b"blob").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some(&b"blob"[..]));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_data() {
        let store = MemoryStore::new();
        let handle = store.clone();

        store.save(b"shared").await.unwrap();
        assert_eq!(handle.data().as_deref(), Some(&b"shared"[..]));
        assert_eq!(handle.write_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failure_toggles() {
        let store = MemoryStore::with_data(b"x".to_vec());

        store.set_fail_loads(true);
        assert!(matches!(
            store.load().await,
            Err(StoreError::AccessDenied { .. })
        ));

        store.set_fail_saves(true);
        assert!(store.save(b"y").await.is_err());
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.data().as_deref(), Some(&b"x"[..]));
    }
}
