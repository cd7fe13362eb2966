//! Monit status fetcher
//!
//! A single GET against the configured status URL, bounded by a deadline that
//! covers connecting, headers and the body read. There are no retries: the
//! next Prometheus scrape is the retry.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error};

use crate::config::Config;

/// Upper bound on one fetch, request and body together.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Client`]
pub enum Error {
    /// The HTTP client could not be constructed from the configuration.
    #[error("Failed to build HTTP client: {0}")]
    Build(reqwest::Error),
    /// DNS, connection, TLS or deadline failure.
    #[error("Unable to fetch Monit status: {0}")]
    Transport(reqwest::Error),
    /// Monit answered with a non-2xx status code.
    #[error("Monit returned non-2xx status code: {code}")]
    HttpStatus {
        /// The status code Monit answered with
        code: u16,
    },
    /// The response body could not be read.
    #[error("Unable to read Monit status: {0}")]
    Body(reqwest::Error),
}

/// Fetches the raw Monit status document.
#[derive(Debug, Clone)]
pub struct Client {
    inner: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl Client {
    /// Create a new [`Client`] for the upstream named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Build`] if the TLS backend cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_timeout(config, FETCH_TIMEOUT)
    }

    pub(crate) fn with_timeout(config: &Config, timeout: Duration) -> Result<Self, Error> {
        let inner = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.ignore_tls)
            .timeout(timeout)
            .build()
            .map_err(Error::Build)?;

        Ok(Self {
            inner,
            url: config.upstream_url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Fetch the status document, returning the body on a 2xx answer.
    ///
    /// # Errors
    ///
    /// See [`Error`]. A deadline hit while the body is still streaming is
    /// reported as [`Error::Transport`], like any other deadline.
    pub async fn fetch(&self) -> Result<Bytes, Error> {
        debug!("fetching Monit status from {url}", url = self.url);

        let mut request = self.inner.get(&self.url);
        if !self.user.is_empty() || !self.password.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request.send().await.map_err(|err| {
            error!("HTTP request to Monit failed: {err}");
            Error::Transport(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Monit returned non-2xx status code: {status}");
            return Err(Error::HttpStatus {
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|err| {
            error!("failed to read Monit response body: {err}");
            if err.is_timeout() {
                Error::Transport(err)
            } else {
                Error::Body(err)
            }
        })?;
        debug!("received Monit status ({len} bytes)", len = body.len());
        Ok(body)
    }
}
