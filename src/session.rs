//! Session state machine of the music-service client.
//!
//! The session owns the app registration and the token pair. The credential
//! store is the durability layer; the in-memory copies are hydrated once by
//! [`Session::init`] and afterwards only change through the transition
//! methods on this type.
//!
//! # States
//!
//! ```text
//!                    init
//! INITIALISING ──────────────┬──────────────┬───────────────┐
//!                            │              │               │
//!                            ▼              ▼               ▼
//!                    MISSING_APP_INFO  MISSING_ACCESS_TOKEN  READY
//!                            │              ▲    │           │
//!           accept_app_info  └──────────────┘    │           │
//!                                                │           │
//!                           accept_tokens ───────┴──────────►│
//!                                               expire_tokens│
//!                           MISSING_ACCESS_TOKEN ◄───────────┘
//! ```
//!
//! Every state assignment is compared with the previous state; only real
//! changes are published, both as an [`Event::StateChanged`] to subscribers
//! and on the [`watch`] channel returned by [`Session::watch_state`]. The
//! now-playing poller runs if and only if that channel reads
//! [`SessionState::Ready`].
//!
//! Token pairs are never installed or persisted before a test call, a
//! now-playing fetch made with the candidate pair, succeeded.

use std::{fmt, sync::Arc};

use tokio::sync::{mpsc, watch};

use crate::{
    error::{Error, Result},
    events::{Event, Subscribers},
    protocol::player::Track,
    provider::Provider,
    store::{self, Store, APP_INFO_KEY, TOKENS_KEY},
    tokens::{AppInfo, TokenPair},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Persisted credentials have not been loaded yet.
    #[default]
    Initialising,

    /// No app registration is known.
    MissingAppInfo,

    /// An app registration is known, but no usable token pair.
    MissingAccessToken,

    /// Credentials are valid; now-playing is being polled.
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialising => write!(f, "initialising"),
            Self::MissingAppInfo => write!(f, "missing app info"),
            Self::MissingAccessToken => write!(f, "missing access token"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

pub struct Session {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,

    app_info: Option<AppInfo>,
    tokens: Option<TokenPair>,

    state_tx: watch::Sender<SessionState>,
    subscribers: Subscribers,
}

impl Session {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Initialising);
        Self {
            store,
            provider,
            app_info: None,
            tokens: None,
            state_tx,
            subscribers: Subscribers::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that tracks the current state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Registers for [`Event::StateChanged`] events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        self.subscribers.subscribe()
    }

    #[must_use]
    pub fn app_info(&self) -> Option<&AppInfo> {
        self.app_info.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    fn set_state(&mut self, state: SessionState) {
        let from = self.state_tx.send_replace(state);
        if from != state {
            info!("session state: {from} -> {state}");
            self.subscribers
                .emit(&Event::StateChanged { from, to: state });
        }
    }

    /// Loads the persisted credentials and settles on a starting state.
    ///
    /// A persisted token pair is tried first. When that call fails, the
    /// access token is refreshed and tried once more; when that fails too,
    /// the persisted token pair is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be read or written.
    /// Failing checks and refreshes are not errors.
    pub async fn init(&mut self) -> Result<()> {
        self.app_info = store::load(self.store.as_ref(), APP_INFO_KEY).await?;
        if self.app_info.is_none() {
            debug!("no app info persisted");
        }

        let persisted = store::load::<TokenPair>(self.store.as_ref(), TOKENS_KEY).await?;
        if persisted.is_some() && self.app_info.is_none() {
            // Tokens cannot be refreshed without the registration they were
            // issued to.
            warn!("discarding persisted tokens without app info");
            self.store.remove(TOKENS_KEY).await?;
        } else if let Some(tokens) = persisted {
            match self.provider.now_playing(&tokens).await {
                Ok(_) => {
                    debug!("persisted tokens are valid");
                    self.tokens = Some(tokens);
                    self.set_state(SessionState::Ready);
                    return Ok(());
                }
                Err(e) => {
                    warn!("persisted tokens were rejected: {e}");
                    self.tokens = Some(tokens);
                }
            }

            match self.renew().await {
                Ok(_) => {
                    self.set_state(SessionState::Ready);
                    return Ok(());
                }
                Err(e) => {
                    warn!("discarding persisted tokens: {e}");
                    self.tokens = None;
                    self.store.remove(TOKENS_KEY).await?;
                }
            }
        } else {
            debug!("no tokens persisted");
        }

        if self.app_info.is_some() {
            self.set_state(SessionState::MissingAccessToken);
        } else {
            self.set_state(SessionState::MissingAppInfo);
        }

        Ok(())
    }

    /// Replaces the app registration.
    ///
    /// Submitting the current registration again does nothing. Otherwise
    /// the token pair, which was issued to the old registration, is
    /// deleted, the new registration is persisted and the session waits
    /// for an access token.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` before [`init`](Self::init) has run, or
    /// an error if the credential store cannot be written.
    pub async fn accept_app_info(&mut self, app_info: AppInfo) -> Result<()> {
        if self.state() == SessionState::Initialising {
            return Err(Error::failed_precondition("session is still initialising"));
        }

        if self.app_info.as_ref() == Some(&app_info) {
            trace!("app info unchanged");
            return Ok(());
        }

        if self.tokens.take().is_some() {
            debug!("discarding tokens of previous app registration");
        }
        self.store.remove(TOKENS_KEY).await?;
        store::save(self.store.as_ref(), APP_INFO_KEY, &app_info).await?;

        info!("app registration set for client id {}", app_info.client_id);
        self.app_info = Some(app_info);
        self.set_state(SessionState::MissingAccessToken);

        Ok(())
    }

    /// Installs a new token pair after checking it.
    ///
    /// All or nothing: when the check fails, neither the in-memory nor the
    /// persisted token pair changes and the state stays where it was.
    /// Submitting the current token pair again while ready does nothing.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when no app registration is known, the
    /// check error when the provider does not accept `tokens`, or an error
    /// if the credential store cannot be written.
    pub async fn accept_tokens(&mut self, tokens: TokenPair) -> Result<()> {
        if self.app_info.is_none() {
            return Err(Error::failed_precondition("app info is missing"));
        }

        if self.state() == SessionState::Ready && self.tokens.as_ref() == Some(&tokens) {
            trace!("tokens unchanged");
            return Ok(());
        }

        self.provider.now_playing(&tokens).await?;
        self.install(tokens).await?;
        self.set_state(SessionState::Ready);

        Ok(())
    }

    /// Fetches the currently playing track with the installed tokens.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when no tokens are installed, or the
    /// provider error.
    pub async fn now_playing(&self) -> Result<Option<Track>> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no tokens installed"))?;
        self.provider.now_playing(tokens).await
    }

    /// Refreshes the access token and fetches the currently playing track
    /// with it.
    ///
    /// The fetch doubles as the check of the refreshed token pair, which is
    /// installed and persisted only when it succeeds. Does not change the
    /// state.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when credentials are missing, the
    /// refresh or fetch error, or an error if the credential store cannot
    /// be written.
    pub async fn renew(&mut self) -> Result<Option<Track>> {
        let app_info = self
            .app_info
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("app info is missing"))?;
        let tokens = self
            .tokens
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no tokens installed"))?;

        debug!("refreshing access token");
        let renewed = self.provider.refresh(app_info, tokens).await?;
        let playing = self.provider.now_playing(&renewed).await?;
        self.install(renewed).await?;

        Ok(playing)
    }

    /// Gives up on the installed tokens after they failed repeatedly.
    ///
    /// Regresses a ready session to [`SessionState::MissingAccessToken`],
    /// which stops the poller. The persisted token pair is kept, so a
    /// restart tries it again.
    pub fn expire_tokens(&mut self) {
        if self.state() == SessionState::Ready {
            self.set_state(SessionState::MissingAccessToken);
        }
    }

    async fn install(&mut self, tokens: TokenPair) -> Result<()> {
        if self.tokens.as_ref() != Some(&tokens) {
            store::save(self.store.as_ref(), TOKENS_KEY, &tokens).await?;
            self.tokens = Some(tokens);
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::{error::ErrorKind, store::MemoryStore};

    /// Provider stub with scripted behaviour.
    ///
    /// Accepts access tokens listed in `valid`. Playback results are taken
    /// from `playing` in order, repeating the last one.
    #[derive(Default)]
    pub(crate) struct Stub {
        pub valid: Mutex<Vec<String>>,
        pub playing: Mutex<VecDeque<Option<Track>>>,
        pub refreshed: Mutex<Option<TokenPair>>,
        pub code: Mutex<Option<(String, TokenPair)>>,
        pub fetches: AtomicUsize,
        pub refreshes: AtomicUsize,
        pub exchanges: AtomicUsize,
    }

    impl Stub {
        pub fn accepting(access: &[&str]) -> Self {
            let stub = Self::default();
            stub.accept(access);
            stub
        }

        pub fn accept(&self, access: &[&str]) {
            *self.valid.lock().unwrap() = access.iter().map(|a| (*a).to_owned()).collect();
        }

        pub fn play(&self, tracks: impl IntoIterator<Item = Option<Track>>) {
            *self.playing.lock().unwrap() = tracks.into_iter().collect();
        }

        pub fn refresh_to(&self, tokens: TokenPair) {
            *self.refreshed.lock().unwrap() = Some(tokens);
        }

        pub fn grant(&self, code: &str, tokens: TokenPair) {
            *self.code.lock().unwrap() = Some((code.to_owned(), tokens));
        }
    }

    #[async_trait]
    impl Provider for Stub {
        fn authorize_url(&self, app: &AppInfo, state: &str) -> Result<Url> {
            let mut url = Url::parse("https://provider.test/authorize")?;
            url.query_pairs_mut()
                .append_pair("client_id", &app.client_id)
                .append_pair("state", state);
            Ok(url)
        }

        async fn exchange_code(&self, _app: &AppInfo, code: &str) -> Result<TokenPair> {
            self.exchanges.fetch_add(1, Ordering::Relaxed);
            match &*self.code.lock().unwrap() {
                Some((granted, tokens)) if granted == code => Ok(tokens.clone()),
                _ => Err(Error::unauthenticated("invalid authorization code")),
            }
        }

        async fn refresh(&self, _app: &AppInfo, _tokens: &TokenPair) -> Result<TokenPair> {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            self.refreshed
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::unauthenticated("invalid refresh token"))
        }

        async fn now_playing(&self, tokens: &TokenPair) -> Result<Option<Track>> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            if !self.valid.lock().unwrap().contains(&tokens.access) {
                return Err(Error::unauthenticated("access token expired"));
            }

            let mut playing = self.playing.lock().unwrap();
            if playing.len() > 1 {
                Ok(playing.pop_front().flatten())
            } else {
                Ok(playing.front().cloned().flatten())
            }
        }
    }

    pub(crate) fn app_info() -> AppInfo {
        AppInfo {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
            redirect_uri: "http://localhost:8888/auth".to_owned(),
        }
    }

    async fn session_with(
        app: Option<AppInfo>,
        tokens: Option<TokenPair>,
        stub: Stub,
    ) -> (Session, Arc<MemoryStore>, Arc<Stub>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(app) = app {
            store::save(store.as_ref(), APP_INFO_KEY, &app)
                .await
                .unwrap();
        }
        if let Some(tokens) = tokens {
            store::save(store.as_ref(), TOKENS_KEY, &tokens)
                .await
                .unwrap();
        }

        let stub = Arc::new(stub);
        let session = Session::new(store.clone(), stub.clone());
        (session, store, stub)
    }

    async fn persisted_tokens(store: &MemoryStore) -> Option<TokenPair> {
        store::load(store, TOKENS_KEY).await.unwrap()
    }

    #[tokio::test]
    async fn init_without_credentials() {
        let (mut session, _, _) = session_with(None, None, Stub::default()).await;
        session.init().await.unwrap();
        assert_eq!(session.state(), SessionState::MissingAppInfo);
    }

    #[tokio::test]
    async fn init_with_app_info_only() {
        let (mut session, _, _) = session_with(Some(app_info()), None, Stub::default()).await;
        session.init().await.unwrap();
        assert_eq!(session.state(), SessionState::MissingAccessToken);
    }

    #[tokio::test]
    async fn init_with_valid_tokens() {
        let tokens = TokenPair::new("good", "refresh");
        let (mut session, _, stub) =
            session_with(Some(app_info()), Some(tokens.clone()), Stub::accepting(&["good"])).await;
        let mut state = session.watch_state();

        session.init().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(*state.borrow_and_update(), SessionState::Ready);
        assert_eq!(session.tokens(), Some(&tokens));
        assert_eq!(stub.refreshes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn init_refreshes_stale_tokens() {
        let stub = Stub::accepting(&["fresh"]);
        stub.refresh_to(TokenPair::new("fresh", "refresh"));
        let (mut session, store, _) = session_with(
            Some(app_info()),
            Some(TokenPair::new("stale", "refresh")),
            stub,
        )
        .await;

        session.init().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            persisted_tokens(&store).await,
            Some(TokenPair::new("fresh", "refresh"))
        );
    }

    #[tokio::test]
    async fn init_discards_unrefreshable_tokens() {
        let (mut session, store, stub) = session_with(
            Some(app_info()),
            Some(TokenPair::new("stale", "refresh")),
            Stub::default(),
        )
        .await;

        session.init().await.unwrap();

        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert_eq!(persisted_tokens(&store).await, None);
        assert_eq!(session.tokens(), None);
        assert_eq!(stub.refreshes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn init_discards_tokens_without_app_info() {
        let (mut session, store, _) =
            session_with(None, Some(TokenPair::new("stale", "refresh")), Stub::default()).await;

        session.init().await.unwrap();

        assert_eq!(session.state(), SessionState::MissingAppInfo);
        assert_eq!(persisted_tokens(&store).await, None);
    }

    #[tokio::test]
    async fn init_discards_valid_tokens_without_app_info() {
        let (mut session, store, stub) = session_with(
            None,
            Some(TokenPair::new("good", "refresh")),
            Stub::accepting(&["good"]),
        )
        .await;

        session.init().await.unwrap();

        assert_eq!(session.state(), SessionState::MissingAppInfo);
        assert_eq!(session.tokens(), None);
        assert_eq!(persisted_tokens(&store).await, None);
        assert_eq!(stub.fetches.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn expired_tokens_can_be_accepted_again() {
        let tokens = TokenPair::new("good", "refresh");
        let (mut session, _, _) =
            session_with(Some(app_info()), Some(tokens.clone()), Stub::accepting(&["good"]))
                .await;
        session.init().await.unwrap();
        session.expire_tokens();

        session.accept_tokens(tokens).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn identical_app_info_is_a_no_op() {
        let (mut session, store, _) = session_with(None, None, Stub::default()).await;
        session.init().await.unwrap();
        let mut events = session.subscribe();

        session.accept_app_info(app_info()).await.unwrap();
        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert_eq!(
            events.try_recv().ok(),
            Some(Event::StateChanged {
                from: SessionState::MissingAppInfo,
                to: SessionState::MissingAccessToken,
            })
        );

        let writes = store.writes();
        session.accept_app_info(app_info()).await.unwrap();
        assert_eq!(store.writes(), writes);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_app_info_discards_tokens() {
        let tokens = TokenPair::new("good", "refresh");
        let (mut session, store, _) =
            session_with(Some(app_info()), Some(tokens), Stub::accepting(&["good"])).await;
        session.init().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let mut other = app_info();
        other.client_id = "other".to_owned();
        session.accept_app_info(other.clone()).await.unwrap();

        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert_eq!(session.app_info(), Some(&other));
        assert_eq!(session.tokens(), None);
        assert_eq!(persisted_tokens(&store).await, None);
    }

    #[tokio::test]
    async fn accepted_tokens_are_persisted() {
        let (mut session, store, _) =
            session_with(Some(app_info()), None, Stub::accepting(&["good"])).await;
        session.init().await.unwrap();

        let tokens = TokenPair::new("good", "refresh");
        session.accept_tokens(tokens.clone()).await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(persisted_tokens(&store).await, Some(tokens));
    }

    #[tokio::test]
    async fn rejected_tokens_change_nothing() {
        let (mut session, store, _) =
            session_with(Some(app_info()), None, Stub::accepting(&["good"])).await;
        session.init().await.unwrap();
        let writes = store.writes();

        let err = session
            .accept_tokens(TokenPair::new("bad", "refresh"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert_eq!(session.tokens(), None);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn tokens_need_app_info() {
        let (mut session, _, _) = session_with(None, None, Stub::accepting(&["good"])).await;
        session.init().await.unwrap();

        let err = session
            .accept_tokens(TokenPair::new("good", "refresh"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn expiring_tokens_keeps_them_persisted() {
        let tokens = TokenPair::new("good", "refresh");
        let (mut session, store, _) =
            session_with(Some(app_info()), Some(tokens.clone()), Stub::accepting(&["good"]))
                .await;
        session.init().await.unwrap();

        session.expire_tokens();

        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert_eq!(persisted_tokens(&store).await, Some(tokens));
    }

    #[tokio::test]
    async fn app_info_before_init_is_refused() {
        let (mut session, _, _) = session_with(None, None, Stub::default()).await;
        let err = session.accept_app_info(app_info()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
        assert_eq!(session.state(), SessionState::Initialising);
    }
}
