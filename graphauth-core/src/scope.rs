//! Permission scopes requested for a token.
//!
//! A [`ScopeSet`] is an ordered, de-duplicated list of scopes. Callers may pass
//! scopes either as a list of strings or as one space-joined string; both
//! normalize to the same sequence:
//!
//! ```
//! use graphauth_core::ScopeSet;
//!
//! let joined = ScopeSet::new(["User.Read Calendars.ReadWrite"]);
//! let listed = ScopeSet::new(["User.Read", "Calendars.ReadWrite"]);
//! assert_eq!(joined, listed);
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// OIDC scopes added to every provider request and never matched against the
/// cache.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Ordered set of permission strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Build a scope set from caller input.
    ///
    /// When exactly one entry is given it is split on whitespace. Empty
    /// entries and reserved OIDC scopes are dropped, and duplicates (compared
    /// case-insensitively) keep their first position.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<String> = scopes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();

        let parts: Vec<String> = if entries.len() == 1 {
            entries[0].split_whitespace().map(String::from).collect()
        } else {
            entries
        };

        let mut set = Self(Vec::with_capacity(parts.len()));
        for scope in parts {
            if scope.is_empty() || is_reserved(&scope) || set.contains(&scope) {
                continue;
            }
            set.0.push(scope);
        }
        set
    }

    /// Parse a space-joined scope string.
    pub fn parse(scopes: &str) -> Self {
        Self::new([scopes])
    }

    /// Resolve the scopes for one acquisition: explicit scopes when any were
    /// given, otherwise the defaults.
    ///
    /// Reserved scopes are stripped before the check, so a request naming
    /// only reserved scopes (for example `["openid"]`) gets the defaults.
    pub fn normalize<S: AsRef<str>>(requested: &[S], defaults: &ScopeSet) -> Self {
        let explicit = Self::new(requested);
        if explicit.is_empty() {
            if !requested.is_empty() {
                tracing::debug!(
                    "Requested scopes are empty or reserved; using defaults '{}'",
                    defaults
                );
            }
            defaults.clone()
        } else {
            explicit
        }
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s.eq_ignore_ascii_case(scope))
    }

    /// Whether every scope in `self` is also in `other`.
    pub fn is_subset_of(&self, other: &ScopeSet) -> bool {
        self.0.iter().all(|s| other.contains(s))
    }

    /// Whether the two sets share at least one scope.
    pub fn intersects(&self, other: &ScopeSet) -> bool {
        self.0.iter().any(|s| other.contains(s))
    }

    /// The scope parameter sent to the provider, reserved scopes included.
    pub fn to_request_string(&self) -> String {
        self.request_scopes().join(" ")
    }

    /// Scopes sent to the provider, reserved scopes appended.
    pub fn request_scopes(&self) -> Vec<String> {
        self.0
            .iter()
            .cloned()
            .chain(RESERVED_SCOPES.iter().map(|s| s.to_string()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_reserved(scope: &str) -> bool {
    RESERVED_SCOPES.iter().any(|r| r.eq_ignore_ascii_case(scope))
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

impl From<&str> for ScopeSet {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Vec<String>> for ScopeSet {
    fn from(scopes: Vec<String>) -> Self {
        Self::new(scopes)
    }
}

/// Accepts either `"a b c"` or `["a", "b", "c"]`.
impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ScopeInput {
            Joined(String),
            List(Vec<String>),
        }

        Ok(match ScopeInput::deserialize(deserializer)? {
            ScopeInput::Joined(s) => Self::parse(&s),
            ScopeInput::List(list) => Self::new(list),
        })
    }
}
