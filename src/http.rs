//! Rate-limited HTTP client.
//!
//! Wraps `reqwest::Client` with a shared request budget and a bounded
//! timeout on every call. Both Spotify and Slack answer bursts with `429`
//! and neither publishes a fixed quota, so requests are kept well below
//! what either tolerates: up to 60 calls per 30 seconds, delaying whatever
//! exceeds that.

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION},
    Body, Method, Request, Response, Url,
};

use crate::{config::Config, error::Result};

pub struct Client {
    /// Request client that bypasses the rate limiter.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 60;

    /// Keep connections to the same host open between two polls.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client.
    ///
    /// Every request is bounded by `config.request_timeout` and identifies
    /// itself with `config.user_agent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend fails to initialize.
    pub fn new(config: &Config) -> Result<Self> {
        let unlimited = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    pub fn request(&self, method: Method, url: Url, body: impl Into<Body>) -> Request {
        let mut request = Request::new(method, url);
        *request.body_mut() = Some(body.into());
        request
    }

    pub fn get(&self, url: Url) -> Request {
        Request::new(Method::GET, url)
    }

    pub fn post(&self, url: Url, body: impl Into<Body>) -> Request {
        self.request(Method::POST, url, body)
    }

    /// Sets the `Authorization` header of `request` to `"{scheme} {credentials}"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials contain characters that are not
    /// allowed in a header.
    pub fn authorize(request: &mut Request, scheme: &str, credentials: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("{scheme} {credentials}"))?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, value)?;
        Ok(())
    }

    /// Executes `request` once the rate limiter allows it.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the request times out.
    /// Non-success statuses are not errors.
    pub fn execute(&self, request: Request) -> impl Future<Output = Result<Response>> + '_ {
        trace!("{} {}", request.method(), request.url());
        self.rate_limiter
            .until_ready()
            .then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}
