//! Domain model types.
//!
//! - [`Account`] - A signed-in principal discovered from a token response
//! - [`AccessToken`] - A bearer token with its absolute expiry

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::Secret;

/// A signed-in principal recorded in the token cache.
///
/// Accounts are discovered from the identity claims of a successful token
/// response and are kept in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, `"{uid}.{utid}"` for Microsoft identity accounts.
    pub home_account_id: String,

    /// Authority host the account signed in through.
    pub environment: String,

    /// Tenant the account authenticated against.
    pub realm: Option<String>,

    /// Sign-in name, usually an email address.
    pub username: Option<String>,

    /// Display name.
    pub name: Option<String>,

    /// When the account was first written to the cache.
    pub discovered_at: DateTime<Utc>,
}

impl Account {
    /// Create a unique key for this account.
    pub fn key(&self) -> String {
        format!("{}/{}", self.environment, self.home_account_id)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "{} ({})", username, self.home_account_id),
            None => write!(f, "{}", self.home_account_id),
        }
    }
}

/// A bearer token handed to remote API clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// The token value.
    pub token: Secret,

    /// Absolute expiry.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: Secret::new(token),
            expires_on,
        }
    }

    /// Value for an HTTP `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token.expose())
    }

    /// Check if this token has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_on <= Utc::now()
    }

    /// Check if this token will expire within the given duration.
    pub fn expires_within(&self, duration: Duration) -> bool {
        self.expires_on < Utc::now() + duration
    }
}
