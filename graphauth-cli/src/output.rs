//! Command output in text and JSON form.

use chrono::{DateTime, Local, Utc};
use graphauth_core::{AccessToken, Account};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct TokenReport {
    pub expires_on: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl TokenReport {
    /// The token value is only included when `show` is set.
    pub fn new(token: &AccessToken, show: bool) -> Self {
        Self {
            expires_on: token.expires_on,
            access_token: show.then(|| token.token.expose().to_string()),
        }
    }

    pub fn render_text(&self) -> String {
        let expires = self.expires_on.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        match &self.access_token {
            Some(token) => format!("{}\n(expires {})", token, expires),
            None => format!(
                "Access token acquired (expires {}); pass --show to print it",
                expires
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountReport {
    pub home_account_id: String,
    pub environment: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub realm: Option<String>,
}

impl From<&Account> for AccountReport {
    fn from(account: &Account) -> Self {
        Self {
            home_account_id: account.home_account_id.clone(),
            environment: account.environment.clone(),
            username: account.username.clone(),
            name: account.name.clone(),
            realm: account.realm.clone(),
        }
    }
}

impl AccountReport {
    pub fn render_list(accounts: &[AccountReport]) -> String {
        if accounts.is_empty() {
            return "No cached accounts".to_string();
        }

        let mut out = String::from("Cached accounts:");
        for (i, account) in accounts.iter().enumerate() {
            let label = account
                .username
                .as_deref()
                .unwrap_or(account.home_account_id.as_str());
            out.push_str(&format!("\n  {}. {}", i + 1, label));
            if let Some(name) = &account.name {
                out.push_str(&format!(" ({})", name));
            }
            if i == 0 {
                out.push_str(" [used for silent sign-in]");
            }
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config_path: PathBuf,
    pub client_id: String,
    pub authority: String,
    pub default_scopes: String,
    pub store_method: String,
    pub encrypted: bool,
    pub cache_path: PathBuf,
    pub accounts: usize,
}

impl StatusReport {
    pub fn render_text(&self) -> String {
        let protection = if self.encrypted {
            self.store_method.clone()
        } else {
            format!("{} (plaintext)", self.store_method)
        };

        [
            format!("Config:         {}", self.config_path.display()),
            format!("Client id:      {}", self.client_id),
            format!("Authority:      {}", self.authority),
            format!("Default scopes: {}", self.default_scopes),
            format!("Cache storage:  {}", protection),
            format!("Cache file:     {}", self.cache_path.display()),
            format!("Accounts:       {}", self.accounts),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_hidden_unless_requested() {
        let token = AccessToken::new("secret-token", Utc::now() + Duration::hours(1));

        let hidden = TokenReport::new(&token, false);
        assert!(!hidden.render_text().contains("secret-token"));
        let json = serde_json::to_string(&hidden).unwrap();
        assert!(!json.contains("access_token"));

        let shown = TokenReport::new(&token, true);
        assert!(shown.render_text().starts_with("secret-token"));
        assert!(serde_json::to_string(&shown).unwrap().contains("secret-token"));
    }

    #[test]
    fn test_account_list_marks_first_account() {
        let accounts = vec![
            AccountReport {
                home_account_id: "a.t".to_string(),
                environment: "login.microsoftonline.com".to_string(),
                username: Some("ana@example.com".to_string()),
                name: Some("Ana".to_string()),
                realm: None,
            },
            AccountReport {
                home_account_id: "b.t".to_string(),
                environment: "login.microsoftonline.com".to_string(),
                username: None,
                name: None,
                realm: None,
            },
        ];

        let text = AccountReport::render_list(&accounts);
        assert!(text.contains("1. ana@example.com (Ana) [used for silent sign-in]"));
        assert!(text.contains("2. b.t"));
        assert!(!text.contains("2. b.t [used"));
        assert_eq!(AccountReport::render_list(&[]), "No cached accounts");
    }

    #[test]
    fn test_status_marks_plaintext_storage() {
        let report = StatusReport {
            config_path: PathBuf::from("config.toml"),
            client_id: "abc".to_string(),
            authority: "https://login.microsoftonline.com/common".to_string(),
            default_scopes: "User.Read".to_string(),
            store_method: "none".to_string(),
            encrypted: false,
            cache_path: PathBuf::from("token_cache.bin"),
            accounts: 0,
        };
        assert!(report.render_text().contains("none (plaintext)"));
    }
}
