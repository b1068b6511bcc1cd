//! Slack Web API envelopes for `users.profile.set`.
//!
//! # Wire Format
//!
//! Request:
//! ```json
//! { "profile": { "status_text": "A & B - T", "status_emoji": ":headphones:" } }
//! ```
//!
//! Response:
//! ```json
//! { "ok": false, "error": "invalid_auth" }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Hash)]
pub struct SetProfile<'a> {
    pub profile: Status<'a>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Hash)]
pub struct Status<'a> {
    pub status_text: &'a str,
    pub status_emoji: &'a str,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct Reply {
    pub ok: bool,

    #[serde(default)]
    pub error: Option<String>,
}
