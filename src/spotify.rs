//! Spotify accounts service and Web API client.

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    StatusCode, Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        auth::{Failure, Token},
        player::{CurrentlyPlaying, Track},
    },
    provider::Provider,
    tokens::{AppInfo, TokenPair},
};

pub struct Spotify {
    http_client: HttpClient,
}

impl Spotify {
    /// The URL users are sent to for granting access.
    const AUTHORIZE_URL: &'static str = "https://accounts.spotify.com/authorize";

    /// The URL of the token endpoint for both code and refresh grants.
    const TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";

    /// The URL of the currently playing track of the user.
    const CURRENTLY_PLAYING_URL: &'static str =
        "https://api.spotify.com/v1/me/player/currently-playing";

    /// The only scope needed: reading the currently playing track.
    const SCOPE: &'static str = "user-read-currently-playing";

    /// The `Content-Type` of token requests.
    const FORM_CONTENT: HeaderValue = HeaderValue::from_static("application/x-www-form-urlencoded");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
        })
    }

    /// Maps a non-success status into an error of the matching kind.
    fn status_error(status: StatusCode, reason: String) -> Error {
        let details = format!("{status}: {reason}");
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Error::unauthenticated(details),
            StatusCode::FORBIDDEN => Error::permission_denied(details),
            StatusCode::NOT_FOUND => Error::not_found(details),
            StatusCode::TOO_MANY_REQUESTS => Error::resource_exhausted(details),
            status if status.is_server_error() => Error::unavailable(details),
            _ => Error::unknown(details),
        }
    }

    /// Posts a grant to the token endpoint.
    async fn token(&self, app: &AppInfo, grant: &[(&str, &str)]) -> Result<Token> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(grant)
            .finish();

        let url = Self::TOKEN_URL.parse::<Url>()?;
        let mut request = self.http_client.post(url, body);

        let credentials = BASE64_STANDARD.encode(format!("{}:{}", app.client_id, app.client_secret));
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::FORM_CONTENT)?;
        HttpClient::authorize(&mut request, "Basic", &credentials)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = protocol::json::<Failure>(&body, "token failure")
                .map_or_else(|_| body.clone(), |failure| failure.to_string());
            return Err(Self::status_error(status, reason));
        }

        // Tokens are redacted in debug output, so this does not log them.
        protocol::json(&body, "token")
    }
}

#[async_trait]
impl Provider for Spotify {
    fn authorize_url(&self, app: &AppInfo, state: &str) -> Result<Url> {
        let mut url = Self::AUTHORIZE_URL.parse::<Url>()?;
        url.query_pairs_mut()
            .append_pair("client_id", &app.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &app.redirect_uri)
            .append_pair("scope", Self::SCOPE)
            .append_pair("state", state);

        Ok(url)
    }

    async fn exchange_code(&self, app: &AppInfo, code: &str) -> Result<TokenPair> {
        let grant = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", app.redirect_uri.as_str()),
        ];

        let token = self.token(app, &grant).await?;
        token
            .into_pair(None)
            .ok_or_else(|| Error::unauthenticated("no refresh token received"))
    }

    async fn refresh(&self, app: &AppInfo, tokens: &TokenPair) -> Result<TokenPair> {
        let grant = [
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens.refresh.as_str()),
        ];

        let token = self.token(app, &grant).await?;
        if token.refresh_token.is_some() {
            debug!("refresh token was rotated");
        }

        token
            .into_pair(Some(&tokens.refresh))
            .ok_or_else(|| Error::internal("refresh token lost"))
    }

    async fn now_playing(&self, tokens: &TokenPair) -> Result<Option<Track>> {
        let url = Self::CURRENTLY_PLAYING_URL.parse::<Url>()?;
        let mut request = self.http_client.get(url);
        HttpClient::authorize(&mut request, "Bearer", &tokens.access)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Self::status_error(status, body));
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        let playing = protocol::json::<CurrentlyPlaying>(&body, "currently playing")?;
        Ok(playing.item)
    }
}
