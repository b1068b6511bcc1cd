//! OAuth token endpoint responses.
//!
//! The accounts service answers both the authorization code grant and the
//! refresh token grant with the same shape. A refresh may omit the refresh
//! token, in which case the previous one stays valid.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "secret_token",
//!     "token_type": "Bearer",
//!     "scope": "user-read-currently-playing",
//!     "expires_in": 3600,
//!     "refresh_token": "secret_refresh_token"
//! }
//! ```
//!
//! Failures come back as:
//!
//! ```json
//! { "error": "invalid_grant", "error_description": "Invalid authorization code" }
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

use crate::tokens::TokenPair;

/// Tokens returned by the accounts service.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct Token {
    /// Bearer token for Web API access
    #[redact]
    pub access_token: String,

    /// Token to obtain a new access token with
    ///
    /// Absent on refreshes that keep the previous refresh token.
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Space-separated list of granted scopes
    #[serde(default)]
    pub scope: Option<String>,

    /// How long the access token remains valid
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    #[serde(default)]
    pub expires_in: Option<Duration>,
}

impl Token {
    /// Turns the response into a [`TokenPair`], keeping `previous_refresh`
    /// when no new refresh token was issued.
    #[must_use]
    pub fn into_pair(self, previous_refresh: Option<&str>) -> Option<TokenPair> {
        let refresh = self
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh.map(str::to_owned))?;
        Some(TokenPair::new(self.access_token, refresh))
    }
}

/// Error returned by the accounts service.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct Failure {
    pub error: String,

    #[serde(default)]
    pub error_description: Option<String>,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{} ({description})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn code_grant_response() {
        let token: Token = protocol::json(
            r#"{"access_token":"a","token_type":"Bearer","scope":"user-read-currently-playing","expires_in":3600,"refresh_token":"r"}"#,
            "test",
        )
        .unwrap();

        assert_eq!(token.expires_in, Some(Duration::from_secs(3600)));
        assert_eq!(token.into_pair(None), Some(TokenPair::new("a", "r")));
    }

    #[test]
    fn refresh_keeps_previous_refresh_token() {
        let token: Token =
            protocol::json(r#"{"access_token":"b","expires_in":3600}"#, "test").unwrap();
        assert_eq!(token.into_pair(Some("r")), Some(TokenPair::new("b", "r")));
    }

    #[test]
    fn code_grant_without_refresh_token_is_incomplete() {
        let token: Token = protocol::json(r#"{"access_token":"a"}"#, "test").unwrap();
        assert_eq!(token.into_pair(None), None);
    }

    #[test]
    fn failure_display() {
        let failure: Failure = protocol::json(
            r#"{"error":"invalid_grant","error_description":"Invalid authorization code"}"#,
            "test",
        )
        .unwrap();
        assert_eq!(
            failure.to_string(),
            "invalid_grant (Invalid authorization code)"
        );
    }
}
