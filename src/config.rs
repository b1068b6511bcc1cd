//! Runtime configuration and secrets.
//!
//! [`Config`] holds everything that is not secret: identification towards
//! the HTTP services, the polling cadence and where the callback server
//! listens. [`Secrets`] is loaded from a TOML file:
//!
//! ```toml
//! slack_token = "xoxp-..."
//!
//! [spotify]
//! client_id = "..."
//! client_secret = "..."
//! redirect_uri = "http://localhost:8888/auth"
//! ```
//!
//! The `[spotify]` table is optional: the app registration can also be
//! submitted through the callback server.

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use serde::Deserialize;
use veil::Redact;

use crate::{
    error::{Error, Result},
    tokens::Registration,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub user_agent: String,

    /// Time between two now-playing fetches.
    pub poll_interval: Duration,

    /// Upper bound for any single outbound HTTP request.
    pub request_timeout: Duration,

    /// Address the OAuth callback server binds to.
    pub listen: SocketAddr,
}

impl Config {
    /// Default time between two now-playing fetches.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

    /// Polling faster than this trips the provider's rate limits.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub const DEFAULT_LISTEN: ([u8; 4], u16) = ([127, 0, 0, 1], 8888);

    /// Creates a configuration with defaults.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if no valid `User-Agent` can be built from the
    /// application and operating system names and versions.
    pub fn new() -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name and/or version invalid (\"{app_name}\"; \"{app_version}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            user_agent,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            listen: SocketAddr::from(Self::DEFAULT_LISTEN),
        })
    }

    /// Sets the poll interval, clamped to [`MIN_POLL_INTERVAL`](Self::MIN_POLL_INTERVAL).
    pub fn set_poll_interval(&mut self, interval: Duration) {
        if interval < Self::MIN_POLL_INTERVAL {
            warn!(
                "poll interval of {}s is too short; using {}s",
                interval.as_secs_f32(),
                Self::MIN_POLL_INTERVAL.as_secs()
            );
        }
        self.poll_interval = interval.max(Self::MIN_POLL_INTERVAL);
    }
}

/// Secrets loaded from the secrets file.
#[derive(Clone, Deserialize, Redact)]
pub struct Secrets {
    /// Slack user token with the `users.profile:write` scope.
    #[redact]
    pub slack_token: String,

    /// Music-service app registration.
    #[serde(default)]
    pub spotify: Option<Registration>,
}

impl Secrets {
    /// Secrets files should be small.
    const MAX_FILE_SIZE: u64 = 4096;

    /// Loads secrets from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, is not
    /// valid TOML or lacks a Slack token.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: secrets file should be small.
        let attributes = fs::metadata(path)?;
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(Error::resource_exhausted(format!(
                "{} is too large",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }
}

impl std::str::FromStr for Secrets {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let secrets: Self = toml::from_str(s)?;
        if secrets.slack_token.trim().is_empty() {
            return Err(Error::invalid_argument("slack token is empty"));
        }

        Ok(secrets)
    }
}
