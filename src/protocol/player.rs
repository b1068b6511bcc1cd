//! Currently playing track from the Web API.
//!
//! `GET /v1/me/player/currently-playing` answers `204 No Content` when
//! nothing is playing, and otherwise:
//!
//! ```json
//! {
//!     "is_playing": true,
//!     "currently_playing_type": "track",
//!     "item": {
//!         "name": "Track",
//!         "artists": [{ "name": "Artist" }, { "name": "Other Artist" }]
//!     }
//! }
//! ```
//!
//! `item` is `null` while an ad plays or in private sessions. Podcast
//! episodes come without `artists`.

use std::fmt;

use serde::Deserialize;

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Hash)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,

    #[serde(default)]
    pub item: Option<Track>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct Track {
    pub name: String,

    #[serde(default)]
    pub artists: Vec<Artist>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct Artist {
    pub name: String,
}

impl Track {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, artists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            artists: artists
                .into_iter()
                .map(|name| Artist { name: name.into() })
                .collect(),
        }
    }
}

/// Renders the track as `"Artist & Artist - Track"`.
///
/// A track without artists renders as its name alone.
impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut artists = self.artists.iter();
        if let Some(first) = artists.next() {
            write!(f, "{}", first.name)?;
            for artist in artists {
                write!(f, " & {}", artist.name)?;
            }
            write!(f, " - ")?;
        }

        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn display_joins_artists() {
        assert_eq!(Track::new("T", ["A", "B"]).to_string(), "A & B - T");
        assert_eq!(Track::new("T", ["A"]).to_string(), "A - T");
        assert_eq!(Track::new("Episode", Vec::<String>::new()).to_string(), "Episode");
    }

    #[test]
    fn parses_track() {
        let playing: CurrentlyPlaying = protocol::json(
            r#"{"is_playing":true,"item":{"name":"T","artists":[{"name":"A","id":"1"},{"name":"B"}],"duration_ms":1}}"#,
            "test",
        )
        .unwrap();

        assert!(playing.is_playing);
        assert_eq!(playing.item, Some(Track::new("T", ["A", "B"])));
    }

    #[test]
    fn parses_missing_item() {
        let playing: CurrentlyPlaying =
            protocol::json(r#"{"is_playing":true,"item":null}"#, "test").unwrap();
        assert_eq!(playing.item, None);
    }
}
