//! The credential facade.
//!
//! [`Credential`] is the one entry point the rest of an application uses:
//! it hydrates the token cache once, serves requests silently when it can,
//! falls back to the device flow, and flushes the cache after every attempt.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use graphauth_core::{AuthConfig, Credential, ScopeSet};
//!
//! let config = AuthConfig::new("my-client-id")
//!     .with_default_scopes(ScopeSet::parse("User.Read Calendars.ReadWrite"));
//! let credential = Credential::new(config).await?;
//!
//! let token = credential.acquire::<&str>(&[]).await?;
//! println!("expires at {}", token.expires_on);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use tokio::sync::Mutex;

use crate::cache::{CachePersistence, TokenCache};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::model::{AccessToken, Account};
use crate::oauth::device_code::{ConsolePrompt, DeviceCodeFlow, DevicePrompt};
use crate::oauth::{IdentityProvider, TokenGrant};
use crate::scope::ScopeSet;
use crate::silent::try_silent;
use crate::store::{Platform, StoreMethod, select_store};

/// Source of bearer tokens for remote API clients.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token valid for `scopes`, or for the configured defaults when
    /// `scopes` is empty.
    async fn bearer_token(&self, scopes: &[&str]) -> Result<AccessToken, AuthError>;
}

/// Acquires and caches tokens for one public client.
pub struct Credential {
    config: AuthConfig,
    provider: IdentityProvider,
    persistence: CachePersistence,
    cache: Mutex<TokenCache>,
    prompt: Box<dyn DevicePrompt>,
}

impl Credential {
    /// Create a credential that persists its cache in the platform's secure
    /// store, or in a plaintext file when none is available.
    pub async fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let settings = config.store_settings();
        let (store, _) = select_store(&Platform::current(), &settings).await;
        let persistence = CachePersistence::new(store, settings.path);

        Self::with_persistence(config, persistence, Box::new(ConsolePrompt)).await
    }

    /// Create a credential with explicit persistence and prompt.
    pub async fn with_persistence(
        config: AuthConfig,
        persistence: CachePersistence,
        prompt: Box<dyn DevicePrompt>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let provider = IdentityProvider::new(config.authority()?, config.client_id.clone());
        if persistence.method() == StoreMethod::None {
            tracing::warn!(
                "No encrypted storage available; token cache falls back to plaintext at {:?}",
                persistence.path()
            );
        }

        let cache = persistence.hydrate().await;

        Ok(Self {
            config,
            provider,
            persistence,
            cache: Mutex::new(cache),
            prompt,
        })
    }

    /// Acquire a token for `scopes`, or for the configured default scopes
    /// when none are given.
    pub async fn acquire<S>(&self, scopes: &[S]) -> Result<AccessToken, AuthError>
    where
        S: AsRef<str> + Sync,
    {
        self.acquire_with_defaults(scopes, &self.config.default_scopes)
            .await
    }

    /// Acquire a token for `scopes`, or for `defaults` when none are given.
    ///
    /// Tries the cache and refresh material first and runs the device flow
    /// only when that fails. The cache is persisted whether or not a token
    /// was obtained.
    pub async fn acquire_with_defaults<S>(
        &self,
        scopes: &[S],
        defaults: &ScopeSet,
    ) -> Result<AccessToken, AuthError>
    where
        S: AsRef<str> + Sync,
    {
        let scopes = ScopeSet::normalize(scopes, defaults);

        let mut cache = self.cache.lock().await;
        let result = self.acquire_locked(&mut cache, &scopes).await;
        self.persistence.persist(&mut cache).await;

        result
    }

    async fn acquire_locked(
        &self,
        cache: &mut TokenCache,
        scopes: &ScopeSet,
    ) -> Result<AccessToken, AuthError> {
        if let Some(token) = try_silent(cache, &self.provider, scopes).await {
            return Ok(token);
        }

        tracing::debug!("Starting device flow for scopes '{}'", scopes);
        let raw = DeviceCodeFlow::new(&self.provider)
            .run(scopes, self.prompt.as_ref())
            .await?;
        let grant = TokenGrant::from_response(&raw, scopes, Utc::now())?;

        match &grant.identity {
            Some(identity) => {
                let account = identity.to_account(self.provider.environment());
                cache.save_grant(&account, self.provider.client_id(), &grant);
                tracing::info!("Signed in as {}", account);
            }
            None => {
                tracing::warn!("Token response named no account; the token will not be cached");
            }
        }

        Ok(grant.access_token())
    }

    /// Accounts cached for this credential's authority, in discovery order.
    pub async fn accounts(&self) -> Vec<Account> {
        self.cache.lock().await.accounts(self.provider.environment())
    }

    /// Forget every cached account of this authority and its tokens.
    ///
    /// Returns the number of accounts removed.
    pub async fn sign_out(&self) -> usize {
        let mut cache = self.cache.lock().await;

        let mut removed = 0;
        for account in cache.accounts(self.provider.environment()) {
            if cache.remove_account(&account) {
                removed += 1;
            }
        }
        self.persistence.persist(&mut cache).await;

        tracing::info!("Signed out {} account(s)", removed);
        removed
    }

    /// Protection applied to the persisted cache.
    pub fn store_method(&self) -> StoreMethod {
        self.persistence.method()
    }

    pub fn cache_path(&self) -> &Path {
        self.persistence.path()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.config.client_id)
            .field("authority", &self.provider.authority().as_str())
            .field("persistence", &self.persistence)
            .finish()
    }
}

#[async_trait]
impl TokenProvider for Credential {
    async fn bearer_token(&self, scopes: &[&str]) -> Result<AccessToken, AuthError> {
        self.acquire(scopes).await
    }
}
