//! Credentials of the music-service client.
//!
//! * [`AppInfo`] is the third-party app registration: client id, client
//!   secret and the redirect URL the provider sends users back to.
//! * [`TokenPair`] is the OAuth2 access and refresh token pair.
//! * [`Registration`] is an unvalidated [`AppInfo`] as it arrives from a
//!   query string or the secrets file.
//!
//! Secrets are redacted from `Debug` output so that they never end up in
//! the log.

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::error::{Error, Result};

/// Third-party app registration with the music service.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Redact)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub client_id: String,

    #[redact]
    pub client_secret: String,

    pub redirect_uri: String,
}

/// OAuth2 access and refresh token pair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Redact)]
pub struct TokenPair {
    #[redact(partial)]
    pub access: String,

    #[redact]
    pub refresh: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

/// An app registration candidate with every field optional.
///
/// Field names follow the query parameters of the callback server:
/// `clientid`, `clientsecret` and `redirecturi`. The secrets file uses the
/// snake case names, which are accepted as aliases.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Redact)]
pub struct Registration {
    #[serde(alias = "client_id")]
    pub clientid: Option<String>,

    #[redact]
    #[serde(alias = "client_secret")]
    pub clientsecret: Option<String>,

    #[serde(alias = "redirect_uri")]
    pub redirecturi: Option<String>,
}

impl Registration {
    /// Whether none of the fields carry a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.clientid, &self.clientsecret, &self.redirecturi]
            .iter()
            .all(|field| field.as_deref().is_none_or(str::is_empty))
    }
}

impl TryFrom<Registration> for AppInfo {
    type Error = Error;

    fn try_from(registration: Registration) -> Result<Self> {
        let required = |field: Option<String>, name: &str| {
            field
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::invalid_argument(format!("{name} is missing")))
        };

        let redirect_uri = required(registration.redirecturi, "redirect uri")?;
        url::Url::parse(&redirect_uri)
            .map_err(|e| Error::invalid_argument(format!("redirect uri is invalid: {e}")))?;

        Ok(Self {
            client_id: required(registration.clientid, "client id")?,
            client_secret: required(registration.clientsecret, "client secret")?,
            redirect_uri,
        })
    }
}
