//! Loading and flushing the token cache.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use zeroize::Zeroize;

use super::TokenCache;
use crate::store::{SecureStore, StoreMethod};

/// Where the token cache is kept: a secure store when one was selected,
/// otherwise a plaintext file.
pub struct CachePersistence {
    store: Option<Box<dyn SecureStore>>,
    method: StoreMethod,
    path: PathBuf,
}

impl CachePersistence {
    /// Persistence through `store`, or through the plaintext file at `path`
    /// when `store` is `None`.
    pub fn new(store: Option<Box<dyn SecureStore>>, path: impl Into<PathBuf>) -> Self {
        let method = store
            .as_ref()
            .map(|s| s.method())
            .unwrap_or(StoreMethod::None);
        Self {
            store,
            method,
            path: path.into(),
        }
    }

    /// Plaintext-only persistence.
    pub fn plaintext(path: impl Into<PathBuf>) -> Self {
        Self::new(None, path)
    }

    pub fn method(&self) -> StoreMethod {
        self.method
    }

    /// Plaintext fallback path (also the DPAPI file).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cache.
    ///
    /// Missing, unreadable or undecodable data yields an empty cache.
    pub async fn hydrate(&self) -> TokenCache {
        let loaded = match &self.store {
            Some(store) => store.load().await.map_err(|e| e.to_string()),
            None => self.read_plaintext().await,
        };

        let mut bytes = match loaded {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("No persisted token cache ({})", self.method);
                return TokenCache::new();
            }
            Err(e) => {
                tracing::warn!("Failed to load token cache ({}): {}", self.method, e);
                return TokenCache::new();
            }
        };

        let cache = TokenCache::deserialize(&bytes);
        bytes.zeroize();

        match cache {
            Ok(cache) => {
                tracing::debug!("Loaded token cache with {} records ({})", cache.len(), self.method);
                cache
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable token cache ({}): {}", self.method, e);
                TokenCache::new()
            }
        }
    }

    /// Write the cache if it changed since it was loaded or last persisted.
    ///
    /// Returns whether a write happened. Failures are logged and leave the
    /// cache dirty so the next call retries.
    pub async fn persist(&self, cache: &mut TokenCache) -> bool {
        if !cache.has_state_changed() {
            return false;
        }

        let mut bytes = match cache.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to encode token cache: {}", e);
                return false;
            }
        };

        let result = match &self.store {
            Some(store) => store.save(&bytes).await.map_err(|e| e.to_string()),
            None => self.write_plaintext(&bytes).await,
        };
        bytes.zeroize();

        match result {
            Ok(()) => {
                cache.mark_persisted();
                tracing::debug!("Persisted token cache ({})", self.method);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to persist token cache ({}): {}", self.method, e);
                false
            }
        }
    }

    async fn read_plaintext(&self) -> Result<Option<Vec<u8>>, String> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("{:?}: {}", self.path, e)),
        }
    }

    async fn write_plaintext(&self, bytes: &[u8]) -> Result<(), String> {
        tracing::warn!(
            "Token cache is stored unencrypted at {:?}",
            self.path
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("{:?}: {}", parent, e))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&self.path)
            .await
            .map_err(|e| format!("{:?}: {}", self.path, e))?;

        // A file left by an older run may still be world-readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| format!("{:?}: {}", self.path, e))?;
        }

        file.write_all(bytes)
            .await
            .map_err(|e| format!("{:?}: {}", self.path, e))?;
        file.flush()
            .await
            .map_err(|e| format!("{:?}: {}", self.path, e))?;

        Ok(())
    }
}

impl std::fmt::Debug for CachePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePersistence")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}
