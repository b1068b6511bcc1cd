//! Events emitted by the session and the now-playing poller.
//!
//! Components register interest with [`Subscribers::subscribe`] and receive
//! events on an unbounded channel. There is no global event bus: each
//! emitter owns its own subscriber list.
//!
//! # Example
//!
//! ```rust
//! use tunestatus::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::StateChanged { from, to } => println!("{from} -> {to}"),
//!         Event::TrackChanged(track) => println!("now playing: {track}"),
//!         Event::PlaybackStopped => println!("stopped"),
//!         Event::RequestFailed(e) => println!("polling failed: {e}"),
//!     }
//! }
//! ```

use tokio::sync::mpsc;

use crate::session::SessionState;

/// Events that can be emitted by the session or the poller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The session moved from one state to another.
    ///
    /// Only emitted on an actual change: assigning the current state again
    /// is silent.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// The now-playing string changed.
    ///
    /// Carries the rendered `"Artist & Artist - Track"` string.
    TrackChanged(String),

    /// Nothing is playing anymore, or the poller stopped while something
    /// was.
    PlaybackStopped,

    /// Fetching the now-playing track failed, even after refreshing the
    /// access token and retrying once.
    RequestFailed(String),
}

/// A list of event subscribers.
#[derive(Debug, Default)]
pub struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<Event>>,
}

impl Subscribers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Sends `event` to every subscriber, dropping those that hung up.
    pub fn emit(&mut self, event: &Event) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
