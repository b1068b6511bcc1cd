//! Periodic now-playing fetch.
//!
//! The poller turns now-playing fetches into [`Event::TrackChanged`]
//! events. It runs if and only if the session is
//! [`Ready`](SessionState::Ready): [`Poller::run`] follows the session's
//! state channel, starting the timer on entering `Ready` and stopping it
//! on leaving.
//!
//! Each tick fetches the current track. On failure the access token is
//! refreshed and the fetch retried once; when that fails too, the session
//! is regressed to [`MissingAccessToken`](SessionState::MissingAccessToken)
//! and an [`Event::RequestFailed`] is emitted. Errors never escape a tick.
//!
//! Ticks never overlap: a tick is awaited before the timer is polled again,
//! and ticks that were missed in the meantime are not made up for.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};

use crate::{
    events::{Event, Subscribers},
    protocol::player::Track,
    session::{Session, SessionState},
};

pub struct Poller {
    interval: Duration,

    /// The now-playing string of the last successful fetch, `None` when
    /// nothing was playing.
    last: Option<String>,

    subscribers: Subscribers,
}

impl Poller {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            subscribers: Subscribers::new(),
        }
    }

    /// Registers for [`Event::TrackChanged`], [`Event::PlaybackStopped`]
    /// and [`Event::RequestFailed`] events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        self.subscribers.subscribe()
    }

    /// Polls for as long as the session exists, while it is ready.
    pub async fn run(mut self, session: Arc<Mutex<Session>>) {
        let mut state_rx = session.lock().await.watch_state();

        loop {
            if state_rx
                .wait_for(|state| *state == SessionState::Ready)
                .await
                .is_err()
            {
                break;
            }

            info!(
                "polling now playing every {}s",
                self.interval.as_secs_f32()
            );
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Stop before fetching once the session is not ready.
                    biased;

                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if *state_rx.borrow_and_update() != SessionState::Ready {
                            break;
                        }
                    }

                    _ = timer.tick() => {
                        let mut session = session.lock().await;
                        if session.state() == SessionState::Ready {
                            self.tick(&mut session).await;
                        }
                    }
                }
            }

            info!("stopped polling now playing");
            if self.last.take().is_some() {
                self.subscribers.emit(&Event::PlaybackStopped);
            }
        }

        debug!("session gone; poller exiting");
    }

    /// Fetches the current track once, refreshing and retrying on failure.
    pub async fn tick(&mut self, session: &mut Session) {
        let playing = match session.now_playing().await {
            Ok(playing) => playing,
            Err(e) => {
                warn!("fetching now playing failed: {e}");
                match session.renew().await {
                    Ok(playing) => playing,
                    Err(e) => {
                        error!("fetching now playing failed after refreshing: {e}");
                        self.subscribers.emit(&Event::RequestFailed(e.to_string()));
                        session.expire_tokens();
                        return;
                    }
                }
            }
        };

        self.observe(playing.as_ref());
    }

    /// Emits a change event when `track` differs from the last one seen,
    /// and a stop event when playback ends.
    ///
    /// "Nothing playing" clears the memory, so a track that resumes after
    /// a gap is announced again.
    fn observe(&mut self, track: Option<&Track>) {
        let current = track.map(ToString::to_string);

        match &current {
            Some(text) if self.last.as_ref() != Some(text) => {
                info!("now playing: {text}");
                self.subscribers.emit(&Event::TrackChanged(text.clone()));
            }
            None if self.last.is_some() => {
                debug!("nothing playing");
                self.subscribers.emit(&Event::PlaybackStopped);
            }
            _ => {}
        }

        self.last = current;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        authorization::Authorizer,
        session::tests::{app_info, Stub},
        store::{self, MemoryStore, APP_INFO_KEY, TOKENS_KEY},
        tokens::TokenPair,
    };

    fn drain(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    fn changed(text: &str) -> Event {
        Event::TrackChanged(text.to_owned())
    }

    async fn ready_session(stub: Stub) -> (Session, Arc<Stub>) {
        let store = Arc::new(MemoryStore::new());
        store::save(store.as_ref(), APP_INFO_KEY, &app_info())
            .await
            .unwrap();
        store::save(store.as_ref(), TOKENS_KEY, &TokenPair::new("good", "refresh"))
            .await
            .unwrap();

        let stub = Arc::new(stub);
        let mut session = Session::new(store, stub.clone());
        session.init().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        (session, stub)
    }

    #[test]
    fn emits_only_on_change() {
        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();

        let x = Track::new("X", ["A"]);
        let y = Track::new("Y", ["B"]);
        for track in [&x, &x, &y, &y, &x] {
            poller.observe(Some(track));
        }

        assert_eq!(
            drain(&mut events),
            vec![changed("A - X"), changed("B - Y"), changed("A - X")]
        );
    }

    #[test]
    fn gap_resets_memory() {
        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();

        let x = Track::new("X", ["A"]);
        poller.observe(Some(&x));
        poller.observe(None);
        poller.observe(None);
        poller.observe(Some(&x));

        assert_eq!(
            drain(&mut events),
            vec![changed("A - X"), Event::PlaybackStopped, changed("A - X")]
        );
    }

    #[tokio::test]
    async fn tick_emits_track_changes() {
        let stub = Stub::accepting(&["good"]);
        stub.play([
            Some(Track::new("T", ["A", "B"])),
            Some(Track::new("T", ["A", "B"])),
            None,
        ]);
        let (mut session, _) = ready_session(stub).await;
        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();

        for _ in 0..3 {
            poller.tick(&mut session).await;
        }

        assert_eq!(
            drain(&mut events),
            vec![changed("A & B - T"), Event::PlaybackStopped]
        );
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn tick_refreshes_expired_token() {
        let stub = Stub::accepting(&["good"]);
        stub.play([Some(Track::new("T", ["A"]))]);
        stub.refresh_to(TokenPair::new("fresh", "refresh"));
        let (mut session, stub) = ready_session(stub).await;
        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();

        stub.accept(&["fresh"]);
        poller.tick(&mut session).await;

        assert_eq!(drain(&mut events), vec![changed("A - T")]);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.tokens(), Some(&TokenPair::new("fresh", "refresh")));
        assert_eq!(stub.refreshes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn tick_regresses_after_failed_retry() {
        let (mut session, stub) = ready_session(Stub::accepting(&["good"])).await;
        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();

        stub.accept(&[]);
        poller.tick(&mut session).await;

        assert_eq!(session.state(), SessionState::MissingAccessToken);
        assert!(matches!(
            drain(&mut events).as_slice(),
            [Event::RequestFailed(_)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_only_while_ready() {
        let stub = Stub::accepting(&["good"]);
        stub.play([Some(Track::new("T", ["A"]))]);
        let (session, stub) = ready_session(stub).await;
        let session = Arc::new(Mutex::new(session));

        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();
        let task = tokio::spawn(poller.run(Arc::clone(&session)));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(events.recv().await, Some(changed("A - T")));
        let fetches = stub.fetches.load(Ordering::Relaxed);
        assert!(fetches >= 3, "expected polling, saw {fetches} fetches");

        session.lock().await.expire_tokens();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(events.recv().await, Some(Event::PlaybackStopped));
        let stopped_at = stub.fetches.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(stub.fetches.load(Ordering::Relaxed), stopped_at);

        task.abort();
    }

    async fn authorize(session: &Mutex<Session>, authorizer: &Authorizer) {
        let mut session = session.lock().await;
        let url = authorizer.authorization_url(&session).await.unwrap();
        let nonce = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        authorizer
            .exchange_code(&mut session, "goodcode", &nonce)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn starts_after_authorization() {
        let store = Arc::new(MemoryStore::new());
        store::save(store.as_ref(), APP_INFO_KEY, &app_info())
            .await
            .unwrap();

        let stub = Arc::new(Stub::accepting(&["good"]));
        stub.play([Some(Track::new("T", ["A"]))]);
        stub.grant("goodcode", TokenPair::new("good", "refresh"));

        let mut session = Session::new(store.clone(), stub.clone());
        session.init().await.unwrap();
        assert_eq!(session.state(), SessionState::MissingAccessToken);
        let session = Arc::new(Mutex::new(session));
        let authorizer = Authorizer::new(store, stub.clone());

        let mut poller = Poller::new(Duration::from_secs(10));
        let mut events = poller.subscribe();
        let task = tokio::spawn(poller.run(Arc::clone(&session)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stub.fetches.load(Ordering::Relaxed), 0);

        authorize(&session, &authorizer).await;
        let before = stub.fetches.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(stub.fetches.load(Ordering::Relaxed) > before);
        assert_eq!(events.recv().await, Some(changed("A - T")));

        session.lock().await.expire_tokens();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(events.recv().await, Some(Event::PlaybackStopped));
        let stopped_at = stub.fetches.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stub.fetches.load(Ordering::Relaxed), stopped_at);

        authorize(&session, &authorizer).await;
        assert_eq!(session.lock().await.state(), SessionState::Ready);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(stub.fetches.load(Ordering::Relaxed) > stopped_at + 1);
        assert_eq!(events.recv().await, Some(changed("A - T")));

        task.abort();
    }
}
