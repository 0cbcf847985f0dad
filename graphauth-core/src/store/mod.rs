//! Encrypted persistence backends for the token cache.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecureStore`] - Trait for encrypted blob storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - macOS Keychain / Linux Secret Service (with `keyring-store` feature)
//! - `DpapiStore` - Windows DPAPI-protected file (Windows builds only)
//! - [`select_store`] - Picks the backend for a platform, or none
//!
//! # Degraded mode
//!
//! When [`select_store`] returns no backend, the token cache is written as a
//! plaintext file instead. That is a weaker security posture, not an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;
#[cfg(windows)]
mod dpapi;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use self::keyring::KeyringStore;
#[cfg(windows)]
pub use dpapi::DpapiStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the memory is wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Name of the protection scheme guarding the persisted cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMethod {
    /// Windows Data Protection API.
    Dpapi,

    /// macOS Keychain.
    Keychain,

    /// Linux Secret Service.
    Libsecret,

    /// In-process memory, for tests.
    Memory,

    /// No encryption: plaintext file fallback.
    None,
}

impl StoreMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dpapi => "dpapi",
            Self::Keychain => "keychain",
            Self::Libsecret => "libsecret",
            Self::Memory => "memory",
            Self::None => "none",
        }
    }

    /// Whether the cache is encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None | Self::Memory)
    }
}

impl fmt::Display for StoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Host platform family, as far as backend selection cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other(String),
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        Self::from_id(std::env::consts::OS)
    }

    /// Map a platform identifier (`"windows"`, `"Darwin"`, `"linux"`, ...)
    /// to a platform family.
    pub fn from_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "windows" | "win32" => Self::Windows,
            "macos" | "darwin" => Self::MacOs,
            "linux" => Self::Linux,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::MacOs => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
            Self::Other(id) => write!(f, "{}", id),
        }
    }
}

/// Naming used to locate the persisted cache in each backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Keyring service name.
    pub app_name: String,

    /// Keyring account name.
    pub label: String,

    /// Cache file, used by file-based backends and the plaintext fallback.
    pub path: PathBuf,
}

/// Error type for secure store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be used on this host.
    #[error("{method} backend unavailable: {message}")]
    Unavailable { method: StoreMethod, message: String },

    /// The OS refused access to the stored blob.
    #[error("access denied to {method} store: {message}")]
    AccessDenied { method: StoreMethod, message: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encrypted storage for one opaque blob.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Read the stored blob.
    ///
    /// Returns `Ok(None)` if nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored blob.
    async fn save(&self, data: &[u8]) -> Result<(), StoreError>;

    /// The protection scheme this store applies.
    fn method(&self) -> StoreMethod;
}

/// Select the encrypted backend for `platform`.
///
/// Returns `(None, StoreMethod::None)` for unsupported platforms and whenever
/// the backend cannot be constructed. That outcome is logged, never raised.
pub async fn select_store(
    platform: &Platform,
    settings: &StoreSettings,
) -> (Option<Box<dyn SecureStore>>, StoreMethod) {
    match build_store(platform, settings).await {
        Ok(store) => {
            let method = store.method();
            tracing::info!("Using {} for token cache encryption", method);
            (Some(store), method)
        }
        Err(e) => {
            tracing::warn!(
                "Error detecting encrypted storage on {} ({}); token cache will not be encrypted",
                platform,
                e
            );
            (None, StoreMethod::None)
        }
    }
}

async fn build_store(
    platform: &Platform,
    settings: &StoreSettings,
) -> Result<Box<dyn SecureStore>, StoreError> {
    match platform {
        Platform::Windows => dpapi_store(settings),
        Platform::MacOs => keyring_store(StoreMethod::Keychain, "macos", settings).await,
        Platform::Linux => keyring_store(StoreMethod::Libsecret, "linux", settings).await,
        Platform::Other(id) => Err(StoreError::Unavailable {
            method: StoreMethod::None,
            message: format!("no encrypted backend for platform '{}'", id),
        }),
    }
}

#[cfg(windows)]
fn dpapi_store(settings: &StoreSettings) -> Result<Box<dyn SecureStore>, StoreError> {
    Ok(Box::new(DpapiStore::new(settings.path.clone())))
}

#[cfg(not(windows))]
fn dpapi_store(_settings: &StoreSettings) -> Result<Box<dyn SecureStore>, StoreError> {
    Err(StoreError::Unavailable {
        method: StoreMethod::Dpapi,
        message: format!("DPAPI is not available in a {} build", std::env::consts::OS),
    })
}

#[cfg(feature = "keyring-store")]
async fn keyring_store(
    method: StoreMethod,
    target_os: &str,
    settings: &StoreSettings,
) -> Result<Box<dyn SecureStore>, StoreError> {
    if std::env::consts::OS != target_os {
        return Err(StoreError::Unavailable {
            method,
            message: format!(
                "{} keyring is not available in a {} build",
                target_os,
                std::env::consts::OS
            ),
        });
    }

    let store = KeyringStore::try_new(method, &settings.app_name, &settings.label).await?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "keyring-store"))]
async fn keyring_store(
    method: StoreMethod,
    _target_os: &str,
    _settings: &StoreSettings,
) -> Result<Box<dyn SecureStore>, StoreError> {
    Err(StoreError::Unavailable {
        method,
        message: "keyring-store feature not enabled".to_string(),
    })
}

/// Run a blocking OS call off the async runtime.
#[cfg(any(windows, feature = "keyring-store"))]
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::BackendError {
            message: format!("blocking store task failed: {}", e),
        })?
}
