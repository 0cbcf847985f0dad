//! # graphauth Core
//!
//! Credential layer for a public OAuth2 client.
//!
//! This crate provides:
//! - Device-flow token acquisition with silent reacquisition from cached refresh material
//! - A token cache persisted across restarts, encrypted with the platform's secure store
//!   (DPAPI, Keychain or Secret Service) or kept as a plaintext file when none is available
//! - A single [`Credential::acquire`] entry point and the [`TokenProvider`] seam for API clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graphauth_core::{Credential, TokenProvider, config::load_config};
//!
//! async fn authorization_header() -> Result<String, Box<dyn std::error::Error>> {
//!     let credential = Credential::new(load_config(None)?).await?;
//!     let token = credential.bearer_token(&["User.Read"]).await?;
//!     Ok(token.authorization_header())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credential;
pub mod error;
pub mod model;
pub mod oauth;
pub mod scope;
pub mod silent;
pub mod store;

// Re-export commonly used types at crate root
pub use model::{
    AccessToken,
    Account,
};

pub use scope::ScopeSet;

pub use store::{
    MemoryStore,
    Platform,
    Secret,
    SecureStore,
    StoreError,
    StoreMethod,
    StoreSettings,
    select_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use cache::{
    CacheError,
    CachePersistence,
    TokenCache,
};

pub use config::{
    AuthConfig,
    Authority,
    ConfigError,
};

pub use oauth::device_code::{
    ConsolePrompt,
    DeviceAuthorization,
    DevicePrompt,
};

pub use credential::{
    Credential,
    TokenProvider,
};

pub use error::AuthError;
