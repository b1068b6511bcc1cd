//! The seam between the session and the music service.
//!
//! A [`Provider`] performs the OAuth2 authorization-code grant and fetches
//! the currently playing track. It holds no credentials itself: the
//! session passes the app registration and token pair it wants to use on
//! every call, which lets it try a candidate token pair without
//! installing it first.

use async_trait::async_trait;
use url::Url;

use crate::{
    error::Result,
    protocol::player::Track,
    tokens::{AppInfo, TokenPair},
};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Builds the URL that starts an authorization attempt, carrying
    /// `state` as the anti-forgery token.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid URL can be built from `app`.
    fn authorize_url(&self, app: &AppInfo, state: &str) -> Result<Url>;

    /// Exchanges an authorization code for a token pair.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the provider rejects the code.
    async fn exchange_code(&self, app: &AppInfo, code: &str) -> Result<TokenPair>;

    /// Obtains a new access token with the refresh token of `tokens`.
    ///
    /// The returned pair keeps the previous refresh token unless the
    /// provider issued a new one.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the provider rejects the refresh token.
    async fn refresh(&self, app: &AppInfo, tokens: &TokenPair) -> Result<TokenPair>;

    /// Fetches the currently playing track, or `None` when nothing plays.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures and when the access token is
    /// not accepted.
    async fn now_playing(&self, tokens: &TokenPair) -> Result<Option<Track>>;
}
