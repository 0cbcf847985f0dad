//! In-memory token cache and its serialized form.
//!
//! The cache holds three kinds of records:
//! - [`Account`] - principals discovered from token responses, in discovery order
//! - [`AccessTokenRecord`] - bearer tokens with the scopes they were granted for
//! - [`RefreshTokenRecord`] - refresh material used for silent reacquisition
//!
//! Token records are keyed by `(home_account_id, environment, client_id)`, so
//! several clients or authorities can share one cache file.
//!
//! Every mutation sets a dirty flag; [`CachePersistence`] only writes when it
//! is set.

mod persistence;

pub use persistence::CachePersistence;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AccessToken, Account};
use crate::oauth::TokenGrant;
use crate::scope::ScopeSet;
use crate::store::Secret;

/// Highest serialized version this build understands.
pub const CACHE_VERSION: u32 = 1;

/// Error type for cache (de)serialization.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported cache version {found}")]
    UnsupportedVersion { found: u32 },
}

/// A cached bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: Option<String>,
    pub scopes: ScopeSet,
    pub secret: Secret,
    pub expires_on: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// Cached refresh material for one account and client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub secret: Secret,
}

impl AccessTokenRecord {
    fn belongs_to(&self, account: &Account, client_id: &str) -> bool {
        self.home_account_id == account.home_account_id
            && self.environment == account.environment
            && self.client_id == client_id
    }
}

impl RefreshTokenRecord {
    fn belongs_to(&self, account: &Account, client_id: &str) -> bool {
        self.home_account_id == account.home_account_id
            && self.environment == account.environment
            && self.client_id == client_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheData {
    version: u32,
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    access_tokens: Vec<AccessTokenRecord>,
    #[serde(default)]
    refresh_tokens: Vec<RefreshTokenRecord>,
}

impl Default for CacheData {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            accounts: Vec::new(),
            access_tokens: Vec::new(),
            refresh_tokens: Vec::new(),
        }
    }
}

/// Process-wide token cache with a dirty flag.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    data: CacheData,
    dirty: bool,
}

impl TokenCache {
    /// Create an empty, clean cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a serialized cache. An empty blob is an empty cache.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        #[derive(Deserialize)]
        struct Header {
            version: u32,
        }

        let header: Header = serde_json::from_slice(bytes)?;
        if header.version > CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion {
                found: header.version,
            });
        }

        let data: CacheData = serde_json::from_slice(bytes)?;
        Ok(Self { data, dirty: false })
    }

    /// Encode the cache for storage.
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(&self.data)?)
    }

    /// Whether the cache changed since it was loaded or last persisted.
    pub fn has_state_changed(&self) -> bool {
        self.dirty
    }

    pub fn mark_persisted(&mut self) {
        self.dirty = false;
    }

    /// Accounts recorded for `environment`, in discovery order.
    pub fn accounts(&self, environment: &str) -> Vec<Account> {
        self.data
            .accounts
            .iter()
            .filter(|a| a.environment == environment)
            .cloned()
            .collect()
    }

    /// The first account discovered for `environment`.
    pub fn first_account(&self, environment: &str) -> Option<Account> {
        self.data
            .accounts
            .iter()
            .find(|a| a.environment == environment)
            .cloned()
    }

    /// A cached access token for `account` covering every scope in `scopes`
    /// and valid at least until `min_valid_until`.
    pub fn find_access_token(
        &self,
        account: &Account,
        client_id: &str,
        scopes: &ScopeSet,
        min_valid_until: DateTime<Utc>,
    ) -> Option<AccessToken> {
        self.data
            .access_tokens
            .iter()
            .filter(|r| r.belongs_to(account, client_id))
            .filter(|r| scopes.is_subset_of(&r.scopes))
            .filter(|r| r.expires_on >= min_valid_until)
            .max_by_key(|r| r.expires_on)
            .map(|r| AccessToken {
                token: r.secret.clone(),
                expires_on: r.expires_on,
            })
    }

    pub fn find_refresh_token(&self, account: &Account, client_id: &str) -> Option<Secret> {
        self.data
            .refresh_tokens
            .iter()
            .find(|r| r.belongs_to(account, client_id))
            .map(|r| r.secret.clone())
    }

    /// Record a grant issued to `account`.
    ///
    /// The account is added (or its profile refreshed in place), access
    /// tokens whose scopes overlap the grant are replaced, and the refresh
    /// token is replaced when the grant carries one.
    pub fn save_grant(&mut self, account: &Account, client_id: &str, grant: &TokenGrant) {
        self.upsert_account(account);

        self.data
            .access_tokens
            .retain(|r| !(r.belongs_to(account, client_id) && r.scopes.intersects(&grant.scopes)));
        self.data.access_tokens.push(AccessTokenRecord {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            client_id: client_id.to_string(),
            realm: account.realm.clone(),
            scopes: grant.scopes.clone(),
            secret: grant.access_token.clone(),
            expires_on: grant.expires_on,
            cached_at: Utc::now(),
        });

        if let Some(refresh_token) = &grant.refresh_token {
            self.data
                .refresh_tokens
                .retain(|r| !r.belongs_to(account, client_id));
            self.data.refresh_tokens.push(RefreshTokenRecord {
                home_account_id: account.home_account_id.clone(),
                environment: account.environment.clone(),
                client_id: client_id.to_string(),
                secret: refresh_token.clone(),
            });
        }

        self.dirty = true;
        tracing::debug!("Cached grant for {} ({} scopes)", account.key(), grant.scopes.len());
    }

    fn upsert_account(&mut self, account: &Account) {
        let existing = self.data.accounts.iter_mut().find(|a| {
            a.home_account_id == account.home_account_id && a.environment == account.environment
        });

        match existing {
            Some(a) => {
                if account.username.is_some() {
                    a.username = account.username.clone();
                }
                if account.name.is_some() {
                    a.name = account.name.clone();
                }
                if account.realm.is_some() {
                    a.realm = account.realm.clone();
                }
            }
            None => {
                tracing::debug!("Discovered account {}", account.key());
                self.data.accounts.push(account.clone());
            }
        }
    }

    /// Remove an account and every token record issued to it.
    ///
    /// Returns whether anything was removed.
    pub fn remove_account(&mut self, account: &Account) -> bool {
        let owned = |home: &str, env: &str| {
            home == account.home_account_id && env == account.environment
        };

        let before = self.len();
        self.data
            .accounts
            .retain(|a| !owned(&a.home_account_id, &a.environment));
        self.data
            .access_tokens
            .retain(|r| !owned(&r.home_account_id, &r.environment));
        self.data
            .refresh_tokens
            .retain(|r| !owned(&r.home_account_id, &r.environment));

        let removed = self.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        if !self.is_empty() {
            self.data = CacheData::default();
            self.dirty = true;
        }
    }

    /// Total number of records of all kinds.
    pub fn len(&self) -> usize {
        self.data.accounts.len() + self.data.access_tokens.len() + self.data.refresh_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
