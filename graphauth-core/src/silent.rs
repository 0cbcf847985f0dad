//! Silent reacquisition from cached credentials.
//!
//! Before any interactive flow, a request is served from the token cache:
//! first from a cached access token that stays valid long enough, then by
//! redeeming the cached refresh token. Only the first discovered account is
//! considered.

use chrono::{Duration, Utc};

use crate::cache::TokenCache;
use crate::model::{AccessToken, Account};
use crate::oauth::IdentityProvider;
use crate::scope::ScopeSet;

/// Cached access tokens closer than this to expiry are refreshed instead.
pub const MIN_REMAINING_SECS: i64 = 300;

/// Try to obtain a token for `scopes` without user interaction.
///
/// Returns `None` when there is no cached account, no usable token or
/// refresh material, or the provider rejects the refresh. Failures are
/// logged, never returned.
pub async fn try_silent(
    cache: &mut TokenCache,
    provider: &IdentityProvider,
    scopes: &ScopeSet,
) -> Option<AccessToken> {
    let Some(account) = cache.first_account(provider.environment()) else {
        tracing::debug!("No cached account for {}", provider.environment());
        return None;
    };

    let min_valid_until = Utc::now() + Duration::seconds(MIN_REMAINING_SECS);
    if let Some(token) =
        cache.find_access_token(&account, provider.client_id(), scopes, min_valid_until)
    {
        tracing::debug!("Using cached access token for {}", account);
        return Some(token);
    }

    let Some(refresh_token) = cache.find_refresh_token(&account, provider.client_id()) else {
        tracing::debug!("No refresh token cached for {}", account);
        return None;
    };

    match provider.refresh(&refresh_token, scopes).await {
        Ok(grant) => {
            // Keep the cached account unless the response names the same one
            // with fresher profile data.
            let account = grant
                .identity
                .as_ref()
                .map(|identity| identity.to_account(provider.environment()))
                .filter(|fresh| fresh.home_account_id == account.home_account_id)
                .map(|fresh| Account {
                    discovered_at: account.discovered_at,
                    ..fresh
                })
                .unwrap_or(account);

            cache.save_grant(&account, provider.client_id(), &grant);
            Some(grant.access_token())
        }
        Err(e) => {
            tracing::warn!("Silent token refresh for {} failed: {}", account, e);
            None
        }
    }
}
