//! Slack status client.
//!
//! Sets the status of the user that owns the token through
//! `users.profile.set`. The token needs the `users.profile:write` scope.

use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        slack::{Reply, SetProfile, Status},
    },
};

pub struct StatusClient {
    http_client: HttpClient,
    token: String,
}

impl StatusClient {
    const PROFILE_SET_URL: &'static str = "https://slack.com/api/users.profile.set";

    /// Emojis to pick from when none is given.
    pub const DEFAULT_EMOJIS: [&'static str; 5] = [
        ":headphones:",
        ":musical_keyboard:",
        ":musical_note:",
        ":musical_score:",
        ":guitar:",
    ];

    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json; charset=utf-8");

    /// Creates a new client for the user owning `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            token: token.into(),
        })
    }

    #[must_use]
    pub fn random_emoji() -> &'static str {
        Self::DEFAULT_EMOJIS[fastrand::usize(..Self::DEFAULT_EMOJIS.len())]
    }

    /// Sets the status text, with a random music emoji unless `emoji` is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Slack replies with
    /// `ok: false`.
    pub async fn set_status(&self, text: &str, emoji: Option<&str>) -> Result<()> {
        let status = Self::status(text, emoji);
        debug!("setting status to {} {text}", status.status_emoji);
        self.profile_set(status).await
    }

    fn status<'a>(text: &'a str, emoji: Option<&'a str>) -> Status<'a> {
        Status {
            status_text: text,
            status_emoji: emoji.unwrap_or(Self::random_emoji()),
        }
    }

    /// Clears the status text and emoji.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Slack replies with
    /// `ok: false`.
    pub async fn clear_status(&self) -> Result<()> {
        debug!("clearing status");
        self.profile_set(Status {
            status_text: "",
            status_emoji: "",
        })
        .await
    }

    async fn profile_set(&self, status: Status<'_>) -> Result<()> {
        let body = serde_json::to_string(&SetProfile { profile: status })?;

        let url = Self::PROFILE_SET_URL.parse::<Url>()?;
        let mut request = self.http_client.post(url, body);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;
        HttpClient::authorize(&mut request, "Bearer", &self.token)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::unavailable(format!("slack replied {status}")));
        }

        Self::check(&protocol::json::<Reply>(&body, "users.profile.set")?)
    }

    /// Slack reports most failures with a successful HTTP status.
    fn check(reply: &Reply) -> Result<()> {
        if reply.ok {
            return Ok(());
        }

        let reason = reply.error.as_deref().unwrap_or("unknown error");
        Err(match reason {
            "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive" => {
                Error::unauthenticated(format!("slack: {reason}"))
            }
            "missing_scope" | "not_allowed_token_type" => {
                Error::permission_denied(format!("slack: {reason}"))
            }
            "ratelimited" => Error::resource_exhausted(format!("slack: {reason}")),
            _ => Error::unknown(format!("slack: {reason}")),
        })
    }
}
