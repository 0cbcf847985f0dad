//! Top-level error types for graphauth.
//!
//! [`AuthError`] is the only error a token acquisition returns. Storage and
//! cache failures are logged and absorbed where they happen, so
//! [`StoreError`](crate::store::StoreError) and
//! [`CacheError`](crate::cache::CacheError) never reach the caller of
//! [`Credential::acquire`](crate::Credential::acquire).

use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Response fields whose values are replaced before a response is logged or
/// attached to an error.
const SECRET_FIELDS: [&str; 3] = ["access_token", "refresh_token", "id_token"];

/// Error type for credential acquisition.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The device-code request could not be made or was rejected.
    #[error("failed to start device flow: {message}")]
    FlowInitiation { message: String },

    /// The user declined the authorization request.
    #[error("authorization declined by the user: {response}")]
    FlowDenied { response: String },

    /// The device code expired before the user finished signing in.
    #[error("device code expired before authorization completed: {response}")]
    FlowExpired { response: String },

    /// The flow ended without a usable access token.
    #[error("no access token obtained ({reason}): {response}")]
    NoToken { reason: String, response: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AuthError {
    pub(crate) fn no_token(reason: impl Into<String>, response: &Value) -> Self {
        Self::NoToken {
            reason: reason.into(),
            response: redact(response),
        }
    }
}

/// Render a provider response with its token values replaced by `[REDACTED]`.
pub(crate) fn redact(response: &Value) -> String {
    match response {
        Value::Object(map) => {
            let mut map = map.clone();
            for field in SECRET_FIELDS {
                if let Some(value) = map.get_mut(field) {
                    *value = Value::String("[REDACTED]".to_string());
                }
            }
            Value::Object(map).to_string()
        }
        other => other.to_string(),
    }
}
