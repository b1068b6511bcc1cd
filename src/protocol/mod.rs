//! Wire types of the services tunestatus talks to.
//!
//! * [`auth`]: Spotify token endpoint replies
//! * [`player`]: the currently playing track
//! * [`slack`]: `users.profile.set` envelopes

pub mod auth;
pub mod player;
pub mod slack;

use std::fmt::Debug;

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Parses a JSON response body, tracing what was received.
///
/// `origin` names the endpoint in log messages. Types carrying secrets
/// redact them in their `Debug` output.
///
/// # Errors
///
/// Returns an error if `body` is not JSON or does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    serde_json::from_str::<T>(body)
        .inspect(|parsed| trace!("{origin}: {parsed:#?}"))
        .map_err(|e| {
            if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                debug!("{origin}: unexpected response structure ({e})");
            } else {
                error!("{origin}: response is not JSON ({e})");
            }
            e.into()
        })
}
