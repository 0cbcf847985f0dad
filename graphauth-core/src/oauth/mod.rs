//! Identity provider endpoints and token responses.
//!
//! This module provides:
//! - [`IdentityProvider`] - the token endpoint of one authority, for one public client
//! - [`TokenGrant`] - a parsed token response
//! - [`Identity`] - the account a token response was issued to
//! - [`device_code`] - the Device Authorization Grant flow

pub mod device_code;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthType, AuthUrl, ClientId, DeviceAuthorizationUrl, TokenUrl};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::Authority;
use crate::error::{AuthError, redact};
use crate::model::{AccessToken, Account};
use crate::scope::ScopeSet;
use crate::store::Secret;

/// A token endpoint reply, before any grant-specific interpretation.
#[derive(Debug)]
pub(crate) enum TokenReply {
    /// 2xx with a JSON body.
    Granted(Value),

    /// A standard OAuth error body.
    Rejected { error: String, body: Value },

    /// Anything else.
    Malformed { status: StatusCode, body: String },
}

/// Token endpoint of one authority, used by one public client.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    http: reqwest::Client,
    authority: Authority,
    client_id: String,
}

impl IdentityProvider {
    pub fn new(authority: Authority, client_id: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), authority, client_id)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        authority: Authority,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority,
            client_id: client_id.into(),
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Environment accounts from this provider are recorded under.
    pub fn environment(&self) -> &str {
        self.authority.environment()
    }

    /// An `oauth2` client for this public client, with the device
    /// authorization endpoint set.
    pub(crate) fn oauth_client(&self) -> Result<BasicClient, String> {
        let auth_url = AuthUrl::new(self.authority.authorize_endpoint())
            .map_err(|e| format!("invalid auth URL: {}", e))?;
        let token_url = TokenUrl::new(self.authority.token_endpoint())
            .map_err(|e| format!("invalid token URL: {}", e))?;
        let device_url = DeviceAuthorizationUrl::new(self.authority.device_code_endpoint())
            .map_err(|e| format!("invalid device authorization URL: {}", e))?;

        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            None,
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_device_authorization_url(device_url))
    }

    /// POST a form to the token endpoint and sort the reply.
    pub(crate) async fn post_token(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenReply, reqwest::Error> {
        let response = self
            .http
            .post(self.authority.token_endpoint())
            .header("client-request-id", uuid::Uuid::new_v4().to_string())
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let json = match serde_json::from_str::<Value>(&body) {
            Ok(json @ Value::Object(_)) => json,
            _ => return Ok(TokenReply::Malformed { status, body }),
        };

        if status.is_success() {
            return Ok(TokenReply::Granted(json));
        }

        match json.get("error").and_then(Value::as_str) {
            Some(error) => Ok(TokenReply::Rejected {
                error: error.to_string(),
                body: json,
            }),
            None => Ok(TokenReply::Malformed {
                status,
                body: redact(&json),
            }),
        }
    }

    /// Redeem a refresh token for a new grant covering `scopes`.
    pub async fn refresh(
        &self,
        refresh_token: &Secret,
        scopes: &ScopeSet,
    ) -> Result<TokenGrant, AuthError> {
        let scope = scopes.to_request_string();
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.expose()),
            ("scope", scope.as_str()),
            ("client_info", "1"),
        ];

        let reply = self.post_token(&form).await.map_err(|e| AuthError::NoToken {
            reason: "token request failed".to_string(),
            response: e.to_string(),
        })?;

        match reply {
            TokenReply::Granted(raw) => {
                let grant = TokenGrant::from_response(&raw, scopes, Utc::now())?;
                tracing::info!("Refreshed access token for scopes '{}'", scopes);
                Ok(grant)
            }
            TokenReply::Rejected { error, body } => Err(AuthError::no_token(
                format!("refresh rejected: {}", error),
                &body,
            )),
            TokenReply::Malformed { status, body } => Err(AuthError::NoToken {
                reason: format!("unexpected token endpoint response ({})", status),
                response: body,
            }),
        }
    }
}

/// The principal a token response was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub home_account_id: String,
    pub realm: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
}

impl Identity {
    /// Account record for this identity under `environment`.
    pub fn to_account(&self, environment: &str) -> Account {
        Account {
            home_account_id: self.home_account_id.clone(),
            environment: environment.to_string(),
            realm: self.realm.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            discovered_at: Utc::now(),
        }
    }

    /// Discover the identity from `client_info`, falling back to the ID
    /// token claims.
    pub fn from_response(raw: &Value) -> Option<Self> {
        let claims = raw
            .get("id_token")
            .and_then(Value::as_str)
            .and_then(id_token_claims);
        let claim = |name: &str| {
            claims
                .as_ref()
                .and_then(|c| c.get(name))
                .and_then(Value::as_str)
                .map(String::from)
        };

        let from_client_info = raw
            .get("client_info")
            .and_then(Value::as_str)
            .and_then(decode_json_segment)
            .and_then(|info| {
                let uid = info.get("uid")?.as_str()?;
                let utid = info.get("utid")?.as_str()?;
                Some((format!("{}.{}", uid, utid), utid.to_string()))
            });

        let (home_account_id, realm) = match from_client_info {
            Some((id, utid)) => (id, Some(utid)),
            None => {
                let id = match (claim("oid"), claim("tid")) {
                    (Some(oid), Some(tid)) => format!("{}.{}", oid, tid),
                    _ => claim("sub").or_else(|| claim("oid"))?,
                };
                (id, claim("tid"))
            }
        };

        Some(Self {
            home_account_id,
            realm: realm.or_else(|| claim("tid")),
            username: claim("preferred_username").or_else(|| claim("upn")),
            name: claim("name"),
        })
    }
}

/// A parsed, successful token response.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub expires_on: DateTime<Utc>,
    /// Granted scopes, reserved scopes excluded.
    pub scopes: ScopeSet,
    pub identity: Option<Identity>,
}

impl TokenGrant {
    /// Parse a token response received at `now` for a request of `requested`.
    ///
    /// The expiry comes from `expires_on` (absolute epoch seconds) when
    /// present, else from `now + expires_in`. A response without an access
    /// token or without either expiry field is [`AuthError::NoToken`].
    pub fn from_response(
        raw: &Value,
        requested: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let access_token = raw
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::no_token("no token obtained", raw))?;

        let expires_on = match (integer_field(raw, "expires_on"), integer_field(raw, "expires_in")) {
            (Some(epoch), _) => DateTime::from_timestamp(epoch, 0),
            (None, Some(seconds)) => {
                Duration::try_seconds(seconds).and_then(|d| now.checked_add_signed(d))
            }
            (None, None) => None,
        }
        .ok_or_else(|| AuthError::no_token("token response has no usable expiry", raw))?;

        let scopes = raw
            .get("scope")
            .and_then(Value::as_str)
            .map(ScopeSet::parse)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| requested.clone());

        let refresh_token = raw
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(Secret::new);

        Ok(Self {
            access_token: Secret::new(access_token),
            refresh_token,
            expires_on,
            scopes,
            identity: Identity::from_response(raw),
        })
    }

    /// The bearer token handed to callers.
    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            token: self.access_token.clone(),
            expires_on: self.expires_on,
        }
    }
}

/// A number, or a string holding one.
fn integer_field(raw: &Value, name: &str) -> Option<i64> {
    match raw.get(name)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode a base64url JSON segment (`client_info`, JWT payloads).
fn decode_json_segment(segment: &str) -> Option<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim().trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Claims of an ID token. The signature is not checked: the token came
/// straight from the token endpoint over TLS.
fn id_token_claims(id_token: &str) -> Option<Value> {
    let payload = id_token.split('.').nth(1)?;
    decode_json_segment(payload)
}
