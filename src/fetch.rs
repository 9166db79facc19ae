use crate::error::{Result, TrackingError};
use crate::models::{Ad, Creative, Impression, TrackingEvent, Vast, Wrapper};
use crate::parser;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::REFERER;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Default timeout for VAST document requests
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of wrapper hops to follow
pub const DEFAULT_WRAPPER_LIMIT: usize = 10;

/// Options the loader forwards to the VAST fetcher
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub with_credentials: bool,
    pub wrapper_limit: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            with_credentials: false,
            wrapper_limit: DEFAULT_WRAPPER_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UrlHandlerOptions {
    /// Referer header attached to every request
    pub referer: Option<String>,

    /// Request timeout; the default applies when unset
    pub timeout: Option<Duration>,
}

/// Request details reported alongside every fetch outcome
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDetails {
    pub byte_length: usize,
    pub status_code: u16,
}

/// Outcome of a URL handler request; the handler itself never fails
#[derive(Debug, Clone)]
pub enum UrlHandlerResponse {
    Success {
        xml: String,
        status_code: u16,
        details: FetchDetails,
    },
    Failure {
        error: String,
        status_code: u16,
        details: FetchDetails,
    },
}

/// HTTP GET handler for VAST documents. Attaches the configured Referer,
/// enforces the timeout, and reports transport problems as a response shape
/// instead of raising them.
pub struct UrlHandler {
    client: reqwest::Client,
    referer: Option<String>,
    timeout: Duration,
}

impl UrlHandler {
    pub fn new(options: UrlHandlerOptions) -> Self {
        UrlHandler {
            client: reqwest::Client::new(),
            referer: options.referer,
            timeout: options.timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
        }
    }

    pub async fn get(&self, url: &str) -> UrlHandlerResponse {
        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        match request.send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                if !response.status().is_success() {
                    return UrlHandlerResponse::Failure {
                        error: format!("HTTP status {status_code}"),
                        status_code,
                        details: FetchDetails {
                            byte_length: 0,
                            status_code,
                        },
                    };
                }

                match response.text().await {
                    Ok(xml) => UrlHandlerResponse::Success {
                        status_code,
                        details: FetchDetails {
                            byte_length: xml.len(),
                            status_code,
                        },
                        xml,
                    },
                    Err(e) => UrlHandlerResponse::Failure {
                        error: format!("Failed to read response body: {e}"),
                        status_code,
                        details: FetchDetails {
                            byte_length: 0,
                            status_code,
                        },
                    },
                }
            }
            Err(e) => {
                let status_code = e.status().map(|s| s.as_u16()).unwrap_or(0);
                UrlHandlerResponse::Failure {
                    error: e.to_string(),
                    status_code,
                    details: FetchDetails {
                        byte_length: 0,
                        status_code,
                    },
                }
            }
        }
    }
}

impl Default for UrlHandler {
    fn default() -> Self {
        Self::new(UrlHandlerOptions::default())
    }
}

/// Resolves a VAST URL into a parsed, unwrapped ad collection
#[async_trait]
pub trait VastFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Vast>;
}

/// Tracking URLs collected while walking a wrapper chain, folded into the
/// unwrapped inline ads at the end
#[derive(Default)]
struct WrapperTracking {
    impressions: Vec<Impression>,
    error_urls: Vec<String>,
    tracking_events: Vec<TrackingEvent>,
}

impl WrapperTracking {
    fn absorb(&mut self, wrapper: &Wrapper) {
        self.impressions.extend(wrapper.impressions.iter().cloned());
        self.error_urls.extend(wrapper.error_urls.iter().cloned());
        self.tracking_events
            .extend(wrapper.tracking_events.iter().cloned());
    }

    fn apply(&self, ads: &mut [Ad]) {
        for ad in ads.iter_mut() {
            ad.impressions.extend(self.impressions.iter().cloned());
            ad.error_urls.extend(self.error_urls.iter().cloned());
            for creative in &mut ad.creatives {
                if let Creative::Linear(linear) = creative {
                    linear
                        .tracking_events
                        .extend(self.tracking_events.iter().cloned());
                }
            }
        }
    }
}

/// VAST fetcher backed by the URL handler and the built-in parser.
///
/// Follows wrapper chains breadth-first up to the configured hop limit with
/// cycle detection; a hop that fails to fetch or parse is skipped rather
/// than failing the whole load.
pub struct HttpVastFetcher {
    handler: UrlHandler,
}

impl HttpVastFetcher {
    pub fn new(handler: UrlHandler) -> Self {
        HttpVastFetcher { handler }
    }

    async fn get_document(&self, url: &str) -> Result<Vast> {
        url::Url::parse(url)?;

        match self.handler.get(url).await {
            UrlHandlerResponse::Success { xml, details, .. } => {
                debug!("fetched {} ({} bytes)", url, details.byte_length);
                parser::parse_vast(&xml)
            }
            UrlHandlerResponse::Failure {
                error, status_code, ..
            } => Err(TrackingError::TransportError(format!(
                "{url}: {error} (status {status_code})"
            ))),
        }
    }

    async fn unwrap_chain(&self, root: Vast, options: &FetchOptions) -> Vast {
        let version = root.version.clone();
        let error = root.error.clone();

        let mut ads = Vec::new();
        let mut collected = WrapperTracking::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Vast, usize)> = VecDeque::new();
        queue.push_back((root, 0));

        while let Some((vast, depth)) = queue.pop_front() {
            ads.extend(vast.ads);

            for wrapper in &vast.wrappers {
                collected.absorb(wrapper);

                let uri = &wrapper.vast_ad_tag_uri;
                if uri.is_empty() {
                    continue;
                }
                if depth + 1 > options.wrapper_limit {
                    warn!("wrapper limit reached, not following {uri}");
                    continue;
                }
                if !visited.insert(uri.clone()) {
                    warn!("cycle detected in wrapper chain, skipping {uri}");
                    continue;
                }

                match self.get_document(uri).await {
                    Ok(next) => queue.push_back((next, depth + 1)),
                    Err(e) => {
                        warn!("failed to follow wrapper {uri}: {e}");
                        continue;
                    }
                }
            }
        }

        collected.apply(&mut ads);

        Vast {
            version,
            ads,
            wrappers: Vec::new(),
            error,
        }
    }
}

#[async_trait]
impl VastFetcher for HttpVastFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Vast> {
        let root = self.get_document(url).await?;
        Ok(self.unwrap_chain(root, options).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE_VAST: &str = r#"<VAST version="3.0">
  <Ad id="ad-1">
    <InLine>
      <AdSystem>Test</AdSystem>
      <AdTitle>Inline</AdTitle>
      <Impression><![CDATA[http://ads.example.com/impression]]></Impression>
      <Creatives>
        <Creative>
          <Linear>
            <Duration>00:00:10</Duration>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[http://ads.example.com/start]]></Tracking>
            </TrackingEvents>
          </Linear>
        </Creative>
      </Creatives>
    </InLine>
  </Ad>
</VAST>"#;

    fn wrapper_vast(next_url: &str) -> String {
        format!(
            r#"<VAST version="3.0">
  <Ad id="wrapper-1">
    <Wrapper>
      <AdSystem>Test</AdSystem>
      <VASTAdTagURI><![CDATA[{next_url}]]></VASTAdTagURI>
      <Impression><![CDATA[http://ads.example.com/wrapper-impression]]></Impression>
      <Creatives>
        <Creative>
          <Linear>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[http://ads.example.com/wrapper-start]]></Tracking>
            </TrackingEvents>
          </Linear>
        </Creative>
      </Creatives>
    </Wrapper>
  </Ad>
</VAST>"#
        )
    }

    #[tokio::test]
    async fn url_handler_attaches_the_referer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/vast.xml")
            .match_header("referer", "https://player.example.com/watch")
            .with_status(200)
            .with_body(INLINE_VAST)
            .create_async()
            .await;

        let handler = UrlHandler::new(UrlHandlerOptions {
            referer: Some("https://player.example.com/watch".to_string()),
            timeout: Some(Duration::from_secs(2)),
        });
        let response = handler.get(&format!("{}/vast.xml", server.url())).await;

        mock.assert_async().await;
        match response {
            UrlHandlerResponse::Success {
                xml,
                status_code,
                details,
            } => {
                assert_eq!(status_code, 200);
                assert_eq!(details.byte_length, xml.len());
            }
            UrlHandlerResponse::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn url_handler_reports_http_errors_without_raising() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/vast.xml")
            .with_status(500)
            .create_async()
            .await;

        let handler = UrlHandler::default();
        let response = handler.get(&format!("{}/vast.xml", server.url())).await;

        match response {
            UrlHandlerResponse::Failure {
                status_code,
                details,
                ..
            } => {
                assert_eq!(status_code, 500);
                assert_eq!(details.status_code, 500);
            }
            UrlHandlerResponse::Success { .. } => panic!("expected a failure shape"),
        }
    }

    #[tokio::test]
    async fn fetches_and_parses_an_inline_document() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/vast.xml")
            .with_status(200)
            .with_body(INLINE_VAST)
            .create_async()
            .await;

        let fetcher = HttpVastFetcher::new(UrlHandler::default());
        let vast = fetcher
            .fetch(&format!("{}/vast.xml", server.url()), &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(vast.ads.len(), 1);
        assert_eq!(vast.ads[0].id.as_deref(), Some("ad-1"));
    }

    #[tokio::test]
    async fn follows_wrappers_and_folds_their_tracking_in() {
        let mut server = mockito::Server::new_async().await;
        let inline_url = format!("{}/inline.xml", server.url());
        let _wrapper = server
            .mock("GET", "/wrapper.xml")
            .with_status(200)
            .with_body(wrapper_vast(&inline_url))
            .create_async()
            .await;
        let _inline = server
            .mock("GET", "/inline.xml")
            .with_status(200)
            .with_body(INLINE_VAST)
            .create_async()
            .await;

        let fetcher = HttpVastFetcher::new(UrlHandler::default());
        let vast = fetcher
            .fetch(
                &format!("{}/wrapper.xml", server.url()),
                &FetchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(vast.ads.len(), 1);
        let ad = &vast.ads[0];
        let impression_urls: Vec<&str> =
            ad.impressions.iter().map(|i| i.url.as_str()).collect();
        assert!(impression_urls.contains(&"http://ads.example.com/wrapper-impression"));

        let linear = ad.first_linear().unwrap();
        let start_urls: Vec<&str> = linear
            .tracking_events
            .iter()
            .filter(|t| t.event == "start")
            .map(|t| t.url.as_str())
            .collect();
        assert_eq!(
            start_urls,
            vec![
                "http://ads.example.com/start",
                "http://ads.example.com/wrapper-start",
            ]
        );
    }

    #[tokio::test]
    async fn a_broken_wrapper_hop_yields_what_was_found_so_far() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/wrapper.xml")
            .with_status(200)
            .with_body(wrapper_vast("http://127.0.0.1:9/unreachable.xml"))
            .create_async()
            .await;

        let fetcher = HttpVastFetcher::new(UrlHandler::new(UrlHandlerOptions {
            referer: None,
            timeout: Some(Duration::from_millis(300)),
        }));
        let vast = fetcher
            .fetch(
                &format!("{}/wrapper.xml", server.url()),
                &FetchOptions::default(),
            )
            .await
            .unwrap();

        // The wrapper itself carried no inline ads
        assert!(vast.ads.is_empty());
    }

    #[tokio::test]
    async fn transport_failures_surface_as_transport_errors() {
        let fetcher = HttpVastFetcher::new(UrlHandler::new(UrlHandlerOptions {
            referer: None,
            timeout: Some(Duration::from_millis(300)),
        }));
        let result = fetcher
            .fetch("http://127.0.0.1:9/vast.xml", &FetchOptions::default())
            .await;

        assert!(matches!(result, Err(TrackingError::TransportError(_))));
    }
}
