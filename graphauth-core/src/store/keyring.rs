//! OS keyring-backed secure store implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{SecureStore, StoreError, StoreMethod, run_blocking};

/// OS keyring-backed store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret-compatible daemons)
///
/// The whole cache blob lives in a single entry whose service is the
/// application name and whose account is the cache label.
pub struct KeyringStore {
    method: StoreMethod,
    service: String,
    account: String,
}

impl KeyringStore {
    /// Try to create a keyring store.
    ///
    /// The entry is read once to confirm the keyring service answers. An
    /// absent entry is fine; a platform failure or denied access is not.
    pub async fn try_new(
        method: StoreMethod,
        service: &str,
        account: &str,
    ) -> Result<Self, StoreError> {
        let store = Self {
            method,
            service: service.to_string(),
            account: account.to_string(),
        };

        let entry = store.create_entry()?;
        run_blocking(move || match entry.get_secret() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Unavailable {
                method,
                message: format!("keyring backend not available: {}", e),
            }),
        })
        .await?;

        Ok(store)
    }

    /// Create a keyring entry for the cache blob.
    fn create_entry(&self) -> Result<Entry, StoreError> {
        Entry::new(&self.service, &self.account).map_err(|e| StoreError::Unavailable {
            method: self.method,
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("method", &self.method)
            .field("service", &self.service)
            .field("account", &self.account)
            .finish()
    }
}

fn map_keyring_error(method: StoreMethod, err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(e) => StoreError::AccessDenied {
            method,
            message: e.to_string(),
        },
        keyring::Error::PlatformFailure(e) => StoreError::BackendError {
            message: format!("platform keyring failure: {}", e),
        },
        keyring::Error::TooLong(attr, limit) => StoreError::BackendError {
            message: format!("keyring {} exceeds {} bytes", attr, limit),
        },
        e => StoreError::BackendError {
            message: format!("keyring error: {}", e),
        },
    }
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = self.create_entry()?;
        let method = self.method;

        run_blocking(move || match entry.get_secret() {
            Ok(blob) => Ok(Some(blob)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(method, e)),
        })
        .await
    }

    async fn save(&self, data: &[u8]) -> Result<(), StoreError> {
        let entry = self.create_entry()?;
        let method = self.method;
        let data = data.to_vec();

        run_blocking(move || {
            entry
                .set_secret(&data)
                .map_err(|e| map_keyring_error(method, e))
        })
        .await
    }

    fn method(&self) -> StoreMethod {
        self.method
    }
}
