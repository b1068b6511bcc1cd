//! OAuth callback server.
//!
//! Serves two routes on the configured listen address:
//!
//! * `GET /` walks the user through setup. Without an app registration it
//!   accepts one from the `clientid`, `clientsecret` and `redirecturi` query
//!   parameters, or explains how to pass them. Without an access token it
//!   redirects to the provider's authorization page.
//! * `GET /auth` is the redirect URI registered with the provider. It
//!   receives `code` and `state`, or `error` when the user denied access.
//!
//! Handlers lock the session for the whole request, so registrations and
//! code exchanges never interleave with each other or with a poll.

use std::{future::Future, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    authorization::Authorizer,
    error::{Error, Result},
    session::{Session, SessionState},
    tokens::Registration,
};

const INSTRUCTIONS: &str = "\
No Spotify app registration is known yet.

Create an app at https://developer.spotify.com/dashboard, add this server's
/auth address as its redirect URI, and open:

    /?clientid=<client id>&clientsecret=<client secret>&redirecturi=<redirect uri>
";

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub authorizer: Arc<Authorizer>,
}

/// Query parameters of the provider's redirect.
#[derive(Clone, Debug, Default, Deserialize)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }

        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/auth", get(auth))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if accepting connections fails.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("callback server listening on http://{addr}");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    debug!("callback server stopped");
    Ok(())
}

async fn home(
    State(state): State<AppState>,
    Query(candidate): Query<Registration>,
) -> Result<Response> {
    let mut session = state.session.lock().await;

    if session.state() == SessionState::MissingAppInfo {
        state
            .authorizer
            .register_app_info(&mut session, candidate)
            .await?;
    }

    let response = match session.state() {
        SessionState::Initialising => {
            (StatusCode::SERVICE_UNAVAILABLE, "Starting up, try again shortly.\n").into_response()
        }
        SessionState::MissingAppInfo => INSTRUCTIONS.into_response(),
        SessionState::MissingAccessToken => {
            let url = state.authorizer.authorization_url(&session).await?;
            debug!("redirecting to authorization page");
            Redirect::temporary(url.as_str()).into_response()
        }
        SessionState::Ready => {
            "Authorized. Your status follows what you are playing.\n".into_response()
        }
    };

    Ok(response)
}

async fn auth(
    State(state): State<AppState>,
    Query(callback): Query<Callback>,
) -> Result<Redirect> {
    if let Some(error) = callback.error {
        return Err(Error::permission_denied(format!(
            "authorization was not granted: {error}"
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| Error::invalid_argument("code is missing"))?;
    let nonce = callback
        .state
        .ok_or_else(|| Error::permission_denied("state is missing"))?;

    let mut session = state.session.lock().await;
    state
        .authorizer
        .exchange_code(&mut session, &code, &nonce)
        .await?;

    info!("authorization completed");
    Ok(Redirect::to("/"))
}
