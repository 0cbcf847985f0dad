//! Configuration loading.
//!
//! Configuration lives in a TOML file, by default
//! `<config dir>/graphauth/config.toml`:
//!
//! ```toml
//! client_id = "00000000-0000-0000-0000-000000000000"
//! tenant = "common"
//! default_scopes = ["User.Read", "Calendars.ReadWrite"]
//!
//! [cache]
//! app_name = "graphauth"
//! label = "MSAL token cache"
//! ```
//!
//! `GRAPHAUTH_CLIENT_ID` and `GRAPHAUTH_TENANT` override the file.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::scope::ScopeSet;
use crate::store::StoreSettings;

/// Environment variable overriding `client_id`.
pub const CLIENT_ID_ENV: &str = "GRAPHAUTH_CLIENT_ID";

/// Environment variable overriding `tenant`.
pub const TENANT_ENV: &str = "GRAPHAUTH_TENANT";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const CACHE_FILE_NAME: &str = "token_cache.bin";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("client_id is not configured (set it in the config file or GRAPHAUTH_CLIENT_ID)")]
    MissingClientId,

    #[error("invalid tenant or authority '{tenant}': {message}")]
    InvalidAuthority { tenant: String, message: String },
}

/// Settings for one public client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Application (client) id registered with the identity provider.
    #[serde(default)]
    pub client_id: String,

    /// `common`, `organizations`, `consumers`, a tenant id or domain, or a
    /// full authority URL.
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Scopes used when a caller asks for none.
    #[serde(default)]
    pub default_scopes: ScopeSet,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Where and under which names the token cache is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keyring service name.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Keyring account name.
    #[serde(default = "default_label")]
    pub label: String,

    /// Cache file; defaults to `token_cache.bin` in the data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_tenant() -> String {
    "common".to_string()
}

fn default_app_name() -> String {
    "graphauth".to_string()
}

fn default_label() -> String {
    "MSAL token cache".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            label: default_label(),
            path: None,
        }
    }
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant: default_tenant(),
            default_scopes: ScopeSet::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn with_default_scopes(mut self, scopes: ScopeSet) -> Self {
        self.default_scopes = scopes;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.path = Some(path.into());
        self
    }

    /// Check the settings a credential cannot work without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        self.authority()?;
        Ok(())
    }

    pub fn authority(&self) -> Result<Authority, ConfigError> {
        Authority::from_tenant(&self.tenant)
    }

    /// Resolved cache file path.
    pub fn cache_path(&self) -> PathBuf {
        self.cache.path.clone().unwrap_or_else(default_cache_path)
    }

    /// Naming handed to the secure store selector.
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            app_name: self.cache.app_name.clone(),
            label: self.cache.label.clone(),
            path: self.cache_path(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(client_id) = env_value(CLIENT_ID_ENV) {
            tracing::debug!("Using client id from {}", CLIENT_ID_ENV);
            self.client_id = client_id;
        }
        if let Some(tenant) = env_value(TENANT_ENV) {
            tracing::debug!("Using tenant from {}", TENANT_ENV);
            self.tenant = tenant;
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load and validate configuration.
///
/// With `path` set the file must exist. Otherwise the default location is
/// read when present and skipped when not, leaving the environment as the only
/// source.
pub fn load_config(path: Option<&Path>) -> Result<AuthConfig, ConfigError> {
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let mut config = if required || config_path.exists() {
        let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        tracing::debug!("Loaded config from {:?}", config_path);
        parse_config(&contents, &config_path)?
    } else {
        tracing::debug!("No config file at {:?}", config_path);
        AuthConfig::new("")
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<AuthConfig, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("graphauth.toml"))
}

fn default_cache_path() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join(CACHE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(".graphauth").join(CACHE_FILE_NAME))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "graphauth", "graphauth")
}

/// Base URL of the identity provider for one tenant, e.g.
/// `https://login.microsoftonline.com/common`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    base: String,
    environment: String,
}

impl Authority {
    /// Resolve a tenant name or full authority URL.
    pub fn from_tenant(tenant: &str) -> Result<Self, ConfigError> {
        let tenant = tenant.trim();
        let invalid = |message: String| ConfigError::InvalidAuthority {
            tenant: tenant.to_string(),
            message,
        };

        if tenant.is_empty() {
            return Err(invalid("tenant is empty".to_string()));
        }

        let base = if tenant.starts_with("https://") || tenant.starts_with("http://") {
            tenant.trim_end_matches('/').to_string()
        } else if tenant.contains('/') {
            return Err(invalid("tenant must be a name or a full URL".to_string()));
        } else {
            format!("{}/{}", DEFAULT_AUTHORITY_HOST, tenant)
        };

        let url = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("authority URL has no host".to_string()))?;
        let environment = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self { base, environment })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Host (and port, when explicit) accounts are recorded under.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.base)
    }

    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.base)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.base)
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_authority_from_tenant_name() {
        let authority = Authority::from_tenant("consumers").unwrap();
        assert_eq!(authority.as_str(), "https://login.microsoftonline.com/consumers");
        assert_eq!(authority.environment(), "login.microsoftonline.com");
        assert_eq!(
            authority.device_code_endpoint(),
            "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode"
        );
        assert_eq!(
            authority.token_endpoint(),
            "https://login.microsoftonline.com/consumers/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_authority_from_url_keeps_port() {
        let authority = Authority::from_tenant("http://127.0.0.1:8123/common/").unwrap();
        assert_eq!(authority.as_str(), "http://127.0.0.1:8123/common");
        assert_eq!(authority.environment(), "127.0.0.1:8123");
    }

    #[test]
    fn test_authority_rejects_garbage() {
        assert!(Authority::from_tenant("").is_err());
        assert!(Authority::from_tenant("a/b").is_err());
        assert!(Authority::from_tenant("https://").is_err());
    }

    #[test]
    fn test_parse_config_defaults() {
        let config = parse_config("client_id = \"abc\"", Path::new("config.toml")).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.tenant, "common");
        assert!(config.default_scopes.is_empty());
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_parse_config_scopes_as_string_or_list() {
        let joined = parse_config(
            "client_id = \"abc\"\ndefault_scopes = \"User.Read Calendars.ReadWrite\"",
            Path::new("config.toml"),
        )
        .unwrap();
        let listed = parse_config(
            "client_id = \"abc\"\ndefault_scopes = [\"User.Read\", \"Calendars.ReadWrite\"]",
            Path::new("config.toml"),
        )
        .unwrap();
        assert_eq!(joined.default_scopes, listed.default_scopes);
        assert_eq!(joined.default_scopes.len(), 2);
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
client_id = "file-client"
tenant = "organizations"

[cache]
app_name = "demo"
path = "/tmp/demo-cache.bin"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        // Environment overrides may be set on the host; only check the rest.
        assert_eq!(config.cache.app_name, "demo");
        assert_eq!(config.cache.label, "MSAL token cache");
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/demo-cache.bin"));
        assert_eq!(config.store_settings().app_name, "demo");
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let dir = TempDir::new().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validate_requires_client_id() {
        assert!(matches!(
            AuthConfig::new("  ").validate(),
            Err(ConfigError::MissingClientId)
        ));
        assert!(AuthConfig::new("abc").validate().is_ok());
        assert!(AuthConfig::new("abc").with_tenant("a/b").validate().is_err());
    }
}
