//! Keeps a Slack status in sync with the track playing on Spotify.
//!
//! The [`session`] holds the Spotify credentials and their state, the
//! [`authorization`] flow obtains them through the [`server`], and the
//! [`poller`] turns now-playing fetches into events that the binary
//! forwards to [`slack`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod authorization;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod nonce;
pub mod poller;
pub mod protocol;
pub mod provider;
pub mod server;
pub mod session;
pub mod signal;
pub mod slack;
pub mod spotify;
pub mod store;
pub mod tokens;
