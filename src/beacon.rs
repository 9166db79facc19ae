use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;

/// Timeout for a tracking request before the pixel fallback kicks in
const DEFAULT_BEACON_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget delivery of resolved tracking URLs. The tracking core
/// receives the dispatcher through this trait instead of a process-wide
/// handle, so tests can substitute a recording implementation.
pub trait BeaconEmitter: Send + Sync {
    fn dispatch(&self, urls: Vec<String>);
}

/// A resolved tracking URL plus its delivery metadata, created per event and
/// discarded after the delivery attempt
#[derive(Debug, Clone)]
pub struct BeaconRequest {
    pub url: String,
    pub timeout: Duration,
    pub with_credentials: bool,
}

impl BeaconRequest {
    pub fn new(url: String, timeout: Duration) -> Self {
        BeaconRequest {
            url,
            timeout,
            // Cookies are never forwarded to ad servers
            with_credentials: false,
        }
    }
}

/// Best-effort beacon delivery with redirect-following semantics.
///
/// Each URL gets a redirect-following GET with a bounded timeout; on any
/// transport failure the URL is retried once as a one-way pixel request
/// whose outcome is not observed. Failures never reach the caller.
#[derive(Clone)]
pub struct BeaconDispatcher {
    client: Client,
    timeout: Duration,
}

impl BeaconDispatcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_BEACON_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        BeaconDispatcher {
            client: Client::new(),
            timeout,
        }
    }

    /// Deliver every URL in the background and return immediately.
    ///
    /// URLs are independent: they may complete in any order, and nothing is
    /// reported back. Must be called from within a Tokio runtime.
    pub fn dispatch(&self, urls: Vec<String>) {
        for url in urls {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let request = BeaconRequest::new(url, dispatcher.timeout);
                dispatcher.deliver(&request).await;
            });
        }
    }

    /// One best-effort delivery attempt; returns whether the primary
    /// redirect-following request went through
    pub async fn deliver(&self, request: &BeaconRequest) -> bool {
        match self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!("tracked {} ({})", request.url, response.status());
                true
            }
            Err(e) => {
                warn!(
                    "tracking request failed for {}, falling back to pixel: {}",
                    request.url, e
                );
                self.send_pixel(&request.url).await;
                false
            }
        }
    }

    /// One-way pixel request; the outcome is deliberately not observed
    async fn send_pixel(&self, url: &str) {
        let _ = self.client.get(url).send().await;
    }
}

impl Default for BeaconDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconEmitter for BeaconDispatcher {
    fn dispatch(&self, urls: Vec<String>) {
        BeaconDispatcher::dispatch(self, urls)
    }
}
