use std::time::Duration;

use reqwest::Client;

use crate::error::FetchError;
use crate::identity::{DelayWindow, IdentityProfile};

/// Single-page HTTP fetcher with identity rotation and polite pacing.
///
/// Every call sleeps a random [`DelayWindow`] sample, then issues one GET as a
/// randomly chosen [`IdentityProfile`]. There are no retries: a failed page is
/// reported to the caller, which decides whether the partition can go on.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    delay: DelayWindow,
}

impl Fetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, delay: DelayWindow) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, delay })
    }

    /// Fetches `url` as a random identity and returns the body text.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] if the request exceeds the client timeout.
    /// - [`FetchError::Status`] for any non-2xx response.
    /// - [`FetchError::Connection`] for DNS, TLS or socket failures.
    pub async fn fetch(&self, url: &str, referer: &str) -> Result<String, FetchError> {
        self.fetch_with_identity(url, referer, IdentityProfile::random())
            .await
    }

    /// Same as [`Self::fetch`] with a caller-chosen identity.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub async fn fetch_with_identity(
        &self,
        url: &str,
        referer: &str,
        identity: &IdentityProfile,
    ) -> Result<String, FetchError> {
        let pause = self.delay.sample();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let response = self
            .client
            .get(url)
            .headers(identity.headers(referer))
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "fetch: non-success status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_owned(),
        }
    } else {
        FetchError::Connection {
            url: url.to_owned(),
            source: err,
        }
    }
}
