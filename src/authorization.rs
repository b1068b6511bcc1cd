//! OAuth2 authorization-code flow.
//!
//! 1. [`Authorizer::register_app_info`] takes the app registration.
//! 2. [`Authorizer::authorization_url`] mints a nonce and points the user
//!    at the provider, carrying the nonce as `state`.
//! 3. The provider redirects back with `code` and `state`;
//!    [`Authorizer::exchange_code`] redeems the nonce, trades the code for
//!    a token pair and hands it to the session.
//!
//! The authorizer never touches HTTP requests or responses of the callback
//! server: it returns data or fails, and the caller renders the result.

use std::sync::Arc;

use url::Url;

use crate::{
    error::{Error, Result},
    nonce::Ledger,
    provider::Provider,
    session::Session,
    store::Store,
    tokens::{AppInfo, Registration},
};

pub struct Authorizer {
    ledger: Ledger,
    provider: Arc<dyn Provider>,
}

impl Authorizer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>) -> Self {
        Self {
            ledger: Ledger::new(store),
            provider,
        }
    }

    /// Builds the provider's authorization URL for a new attempt.
    ///
    /// Persists one fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when no app registration is known, or
    /// an error if the nonce cannot be persisted.
    pub async fn authorization_url(&self, session: &Session) -> Result<Url> {
        let app_info = session
            .app_info()
            .ok_or_else(|| Error::failed_precondition("app info is missing"))?;

        let state = self.ledger.issue().await?;
        self.provider.authorize_url(app_info, &state)
    }

    /// Completes an authorization attempt.
    ///
    /// The nonce is redeemed before anything else; a forged or replayed
    /// `state` never reaches the provider.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` for an invalid or replayed `state`,
    /// `Unauthenticated` when the provider rejects `code`, and whatever
    /// [`Session::accept_tokens`] returns, unchanged.
    pub async fn exchange_code(&self, session: &mut Session, code: &str, state: &str) -> Result<()> {
        self.ledger.redeem(state).await?;

        let app_info = session
            .app_info()
            .ok_or_else(|| Error::failed_precondition("app info is missing"))?;
        let tokens = self.provider.exchange_code(app_info, code).await?;

        session.accept_tokens(tokens).await
    }

    /// Submits an app registration candidate.
    ///
    /// A candidate without any field set is ignored, so that callers can
    /// pass along whatever query they received and re-check the session
    /// state afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a partially filled candidate, and
    /// whatever [`Session::accept_app_info`] returns.
    pub async fn register_app_info(
        &self,
        session: &mut Session,
        candidate: Registration,
    ) -> Result<()> {
        if candidate.is_empty() {
            trace!("ignoring empty app registration");
            return Ok(());
        }

        let app_info = AppInfo::try_from(candidate)?;
        session.accept_app_info(app_info).await
    }
}
