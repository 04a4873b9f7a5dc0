//! Ordered, deduplicated scope sets (RFC 6749 Section 3.3).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::OAuthError;

/// An ordered set of scope tokens.
///
/// Insertion order is preserved and duplicates are dropped, so a scope parsed from
/// `"read write read"` holds `["read", "write"]`. Comparison between scopes is
/// set-based and case-sensitive. Deserialization goes through the same validation as
/// [`Scope::parse`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Scope(Vec<String>);

impl Scope {
    /// An empty scope.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the space-delimited wire form, rejecting malformed scope tokens.
    pub fn parse(value: &str) -> Result<Self, OAuthError> {
        Self::from_tokens(value.split(' ').filter(|s| !s.is_empty()))
    }

    /// Build a scope from individual tokens, rejecting malformed ones.
    pub fn from_tokens<S: AsRef<str>>(
        tokens: impl IntoIterator<Item = S>,
    ) -> Result<Self, OAuthError> {
        let mut scope = Self::empty();
        for token in tokens {
            let token = token.as_ref();
            if !is_scope_token(token) {
                return Err(OAuthError::InvalidScope(format!(
                    "Malformed scope token '{}'",
                    token
                )));
            }
            scope.push(token);
        }
        Ok(scope)
    }

    /// Parse an optional wire value, treating an absent parameter as `None`.
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>, OAuthError> {
        value.map(Self::parse).transpose()
    }

    fn push(&mut self, token: &str) {
        if !self.contains(token) {
            self.0.push(token.to_string());
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|s| s == token)
    }

    /// True when every token in `self` is present in `other`.
    pub fn is_subset_of(&self, other: &Scope) -> bool {
        self.0.iter().all(|s| other.contains(s))
    }

    /// Tokens in `self` that are missing from `other`.
    pub fn missing_from<'a>(&'a self, other: &Scope) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|s| !other.contains(s))
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Set equality: order does not matter.
impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset_of(other) && other.is_subset_of(self)
    }
}

impl Eq for Scope {}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl TryFrom<Vec<String>> for Scope {
    type Error = OAuthError;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_tokens(tokens)
    }
}

impl From<Scope> for Vec<String> {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}

/// `scope-token = 1*( %x21 / %x23-5B / %x5D-7E )`
fn is_scope_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}
