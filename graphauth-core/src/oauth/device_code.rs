//! Device Authorization Grant flow (RFC 8628).
//!
//! This module implements the OAuth 2.0 Device Authorization Grant flow,
//! which is designed for devices with limited input capabilities or no browser.
//!
//! # Flow Overview
//!
//! 1. Request device and user codes from the authorization server
//! 2. Hand the user code and verification URL to a [`DevicePrompt`]
//! 3. User visits the URL on another device and enters the code
//! 4. Poll the token endpoint until the user authorizes, declines, or the code expires
//! 5. Return the raw token response for parsing
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use graphauth_core::config::Authority;
//! use graphauth_core::oauth::IdentityProvider;
//! use graphauth_core::oauth::device_code::{ConsolePrompt, DeviceCodeFlow};
//! use graphauth_core::ScopeSet;
//!
//! let provider = IdentityProvider::new(Authority::from_tenant("common")?, "my-client-id");
//! let flow = DeviceCodeFlow::new(&provider);
//!
//! let raw = flow.run(&ScopeSet::parse("User.Read"), &ConsolePrompt).await?;
//! # Ok(())
//! # }
//! ```

use oauth2::basic::BasicErrorResponse;
use oauth2::reqwest::async_http_client;
use oauth2::{
    DeviceAuthorizationResponse, ExtraDeviceAuthorizationFields, RequestTokenError, Scope,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use super::{IdentityProvider, TokenReply};
use crate::error::{AuthError, redact};
use crate::scope::ScopeSet;
use crate::store::Secret;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Seconds added to the polling interval on `slow_down`.
const SLOW_DOWN_STEP: u64 = 5;

/// Device authorization response.
///
/// Contains the codes and URIs needed for the user to authorize the device.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    /// The device verification code.
    pub device_code: Secret,

    /// The user verification code to display to the user.
    pub user_code: String,

    /// The URI where the user should go to authorize.
    pub verification_uri: String,

    /// Optional URI with the user code embedded (for QR codes).
    pub verification_uri_complete: Option<String>,

    /// Ready-made instructions from the provider.
    pub message: Option<String>,

    /// Minimum interval in seconds between polling requests.
    pub interval: u64,

    /// Time in seconds until the device code expires.
    pub expires_in: u64,
}

impl DeviceAuthorization {
    /// Text to show the user: the provider's message, or a generic one.
    pub fn instructions(&self) -> String {
        match &self.message {
            Some(message) if !message.trim().is_empty() => message.clone(),
            _ => format!(
                "To sign in, open {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            ),
        }
    }
}

/// Non-standard fields of the device authorization response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderDeviceFields {
    #[serde(default)]
    pub message: Option<String>,
}

impl ExtraDeviceAuthorizationFields for ProviderDeviceFields {}

/// Shows the user how to complete the sign-in.
pub trait DevicePrompt: Send + Sync {
    fn display(&self, authorization: &DeviceAuthorization);
}

/// Prints the instructions to standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl DevicePrompt for ConsolePrompt {
    fn display(&self, authorization: &DeviceAuthorization) {
        eprintln!("{}", authorization.instructions());
    }
}

/// What one poll of the token endpoint means for the flow.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Pending,
    SlowDown,
    Completed(Value),
    Denied(String),
    Expired(String),
    Failed { reason: String, response: String },
}

impl PollOutcome {
    pub(crate) fn classify(reply: TokenReply) -> Self {
        match reply {
            TokenReply::Granted(raw) => Self::Completed(raw),
            TokenReply::Rejected { error, body } => match error.as_str() {
                "authorization_pending" => Self::Pending,
                "slow_down" => Self::SlowDown,
                "authorization_declined" | "access_denied" => Self::Denied(redact(&body)),
                "expired_token" | "code_expired" => Self::Expired(redact(&body)),
                _ => Self::Failed {
                    reason: format!("device flow failed: {}", error),
                    response: redact(&body),
                },
            },
            TokenReply::Malformed { status, body } => Self::Failed {
                reason: format!("unexpected token endpoint response ({})", status),
                response: body,
            },
        }
    }
}

/// Device code flow against one identity provider.
pub struct DeviceCodeFlow<'a> {
    provider: &'a IdentityProvider,
}

impl<'a> DeviceCodeFlow<'a> {
    pub fn new(provider: &'a IdentityProvider) -> Self {
        Self { provider }
    }

    /// Request device and user codes for `scopes`.
    pub async fn initiate(&self, scopes: &ScopeSet) -> Result<DeviceAuthorization, AuthError> {
        let client = self
            .provider
            .oauth_client()
            .map_err(|message| AuthError::FlowInitiation { message })?;

        let request = client
            .exchange_device_code()
            .map_err(|e| AuthError::FlowInitiation {
                message: format!("failed to create device code request: {}", e),
            })?
            .add_scopes(scopes.request_scopes().into_iter().map(Scope::new));

        let response: DeviceAuthorizationResponse<ProviderDeviceFields> = request
            .request_async(async_http_client)
            .await
            .map_err(initiation_error)?;

        tracing::debug!(
            "Device code issued; expires in {}s, poll every {}s",
            response.expires_in().as_secs(),
            response.interval().as_secs()
        );

        Ok(DeviceAuthorization {
            device_code: Secret::new(response.device_code().secret().to_string()),
            user_code: response.user_code().secret().to_string(),
            verification_uri: response.verification_uri().to_string(),
            verification_uri_complete: response
                .verification_uri_complete()
                .map(|uri| uri.secret().to_string()),
            message: response.extra_fields().message.clone(),
            interval: response.interval().as_secs(),
            expires_in: response.expires_in().as_secs(),
        })
    }

    /// Poll the token endpoint until the user authorizes, declines, or the
    /// device code expires.
    ///
    /// Returns the raw token response.
    pub async fn poll(&self, authorization: &DeviceAuthorization) -> Result<Value, AuthError> {
        let mut interval = Duration::from_secs(authorization.interval);
        // An expiry too far out to represent leaves the provider to end the flow.
        let deadline = Instant::now().checked_add(Duration::from_secs(authorization.expires_in));
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", self.provider.client_id()),
            ("device_code", authorization.device_code.expose()),
            ("client_info", "1"),
        ];

        loop {
            sleep(interval).await;

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(AuthError::FlowExpired {
                    response: format!(
                        "device code was not redeemed within {}s",
                        authorization.expires_in
                    ),
                });
            }

            let reply = self
                .provider
                .post_token(&form)
                .await
                .map_err(|e| AuthError::NoToken {
                    reason: "network error during polling".to_string(),
                    response: e.to_string(),
                })?;

            match PollOutcome::classify(reply) {
                PollOutcome::Pending => {
                    tracing::debug!("Authorization pending, continuing to poll...");
                }
                PollOutcome::SlowDown => {
                    interval += Duration::from_secs(SLOW_DOWN_STEP);
                    tracing::warn!(
                        "Polling too fast, slowing down to every {}s",
                        interval.as_secs()
                    );
                }
                PollOutcome::Completed(raw) => {
                    tracing::info!("Device authorization completed");
                    return Ok(raw);
                }
                PollOutcome::Denied(response) => return Err(AuthError::FlowDenied { response }),
                PollOutcome::Expired(response) => return Err(AuthError::FlowExpired { response }),
                PollOutcome::Failed { reason, response } => {
                    return Err(AuthError::NoToken { reason, response });
                }
            }
        }
    }

    /// Initiate, show the prompt, and poll to completion.
    pub async fn run(
        &self,
        scopes: &ScopeSet,
        prompt: &dyn DevicePrompt,
    ) -> Result<Value, AuthError> {
        let authorization = self.initiate(scopes).await?;
        prompt.display(&authorization);
        self.poll(&authorization).await
    }
}

fn initiation_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    let message = match err {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Request(e) => format!("device code request failed: {}", e),
        RequestTokenError::Parse(e, body) => format!(
            "malformed device code response: {} ({})",
            e,
            String::from_utf8_lossy(&body)
        ),
        RequestTokenError::Other(message) => message,
    };
    AuthError::FlowInitiation { message }
}
