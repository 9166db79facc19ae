use crate::beacon::BeaconEmitter;
use crate::error::{Result, TrackingError};
use crate::fetch::{FetchOptions, VastFetcher};
use crate::models::{Ad, Companion, Vast, Variation};
use crate::parser;
use crate::reporting::attach_reporting;
use crate::sink::{EventRecord, EventSink};
use crate::tracker::{Tracker, TrackerEvent};
use log::{debug, info, warn};
use std::sync::Arc;

/// Source identifier used for ads loaded from inline XML
const INLINE_XML_SOURCE: &str = "inline-xml";

/// Inline XML input, either already parsed or a raw document string
#[derive(Debug, Clone)]
pub enum XmlInput {
    Parsed(Vast),
    Raw(String),
}

/// Where the ads come from: a prioritized URL list (first success wins) or
/// inline XML. Supplying neither is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct AdSource {
    pub urls: Option<Vec<String>>,
    pub xml: Option<XmlInput>,
}

impl AdSource {
    pub fn from_urls(urls: Vec<String>) -> Self {
        AdSource {
            urls: Some(urls),
            xml: None,
        }
    }

    pub fn from_xml(xml: XmlInput) -> Self {
        AdSource {
            urls: None,
            xml: Some(xml),
        }
    }
}

/// Ad selection policy, opaque to the tracking core
pub trait AdSelector: Send + Sync {
    fn select_ads(&self, ads: Vec<Ad>) -> Vec<Ad>;
}

/// Default policy: keep every ad the parser produced
pub struct SelectAll;

impl AdSelector for SelectAll {
    fn select_ads(&self, ads: Vec<Ad>) -> Vec<Ad> {
        ads
    }
}

/// Click-through destination collaborator; an embedding player typically
/// opens the URL in a new browsing context
pub trait Navigator: Send + Sync {
    fn open(&self, url: &str);
}

/// Default navigator: records the intent and goes nowhere
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn open(&self, url: &str) {
        info!("click-through: {url}");
    }
}

/// Size limits for companion variations
#[derive(Debug, Clone, Copy)]
pub struct CompanionOptions {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for CompanionOptions {
    fn default() -> Self {
        CompanionOptions {
            max_width: 300,
            max_height: 250,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub fetch: FetchOptions,
    pub companion: CompanionOptions,
}

/// An ad under tracking: exactly one linear tracker and, when a suitable
/// companion variation exists, a companion tracker
pub struct TrackedAd {
    pub linear: Tracker,
    pub companion: Option<Tracker>,
}

/// Resolves an ad source into TrackedAds.
///
/// All collaborators come in through constructor injection; the loader never
/// reaches for process-wide state.
pub struct AdLoader {
    fetcher: Arc<dyn VastFetcher>,
    selector: Arc<dyn AdSelector>,
    dispatcher: Arc<dyn BeaconEmitter>,
    sink: Arc<dyn EventSink>,
    navigator: Arc<dyn Navigator>,
    options: LoaderOptions,
}

impl AdLoader {
    pub fn new(
        fetcher: Arc<dyn VastFetcher>,
        selector: Arc<dyn AdSelector>,
        dispatcher: Arc<dyn BeaconEmitter>,
        sink: Arc<dyn EventSink>,
        navigator: Arc<dyn Navigator>,
        options: LoaderOptions,
    ) -> Self {
        AdLoader {
            fetcher,
            selector,
            dispatcher,
            sink,
            navigator,
            options,
        }
    }

    /// Resolve the source into tracked ads.
    ///
    /// URLs are tried strictly in order; a URL succeeds only when it yields a
    /// non-empty ad collection, and every per-URL failure falls through to
    /// the next. Exhausting the list is not an error, it is an empty result.
    /// Only a source with neither URLs nor XML is rejected.
    pub async fn load(&self, source: &AdSource) -> Result<Vec<TrackedAd>> {
        let urls: Vec<&String> = source.urls.iter().flatten().collect();

        if !urls.is_empty() {
            for url in urls {
                match self.fetcher.fetch(url, &self.options.fetch).await {
                    Ok(vast) if !vast.ads.is_empty() => {
                        self.emit_source_event("vast-loaded", url);
                        self.emit_source_event("vast-parsed", url);
                        return Ok(self.create_tracked_ads(vast.ads, url));
                    }
                    Ok(_) => {
                        debug!("no ads from {url}, trying next source");
                    }
                    Err(e) => {
                        warn!("failed to load ads from {url}: {e}");
                    }
                }
            }
            return Ok(Vec::new());
        }

        if let Some(xml) = &source.xml {
            let vast = match xml {
                XmlInput::Parsed(vast) => vast.clone(),
                XmlInput::Raw(raw) => parser::parse_vast(raw)?,
            };
            self.emit_source_event("vast-loaded", INLINE_XML_SOURCE);
            self.emit_source_event("vast-parsed", INLINE_XML_SOURCE);
            return Ok(self.create_tracked_ads(vast.ads, INLINE_XML_SOURCE));
        }

        Err(TrackingError::Configuration(
            "either urls or xml must be set".to_string(),
        ))
    }

    fn create_tracked_ads(&self, ads: Vec<Ad>, source: &str) -> Vec<TrackedAd> {
        let ads = self.selector.select_ads(ads);
        self.sink
            .emit(EventRecord::new("ads-count").with_payload("count", ads.len() as u64));

        let tracked: Vec<TrackedAd> = ads
            .iter()
            .filter_map(|ad| self.create_tracked_ad(ad))
            .collect();

        self.emit_source_event("vast-ready", source);
        tracked
    }

    fn create_tracked_ad(&self, ad: &Ad) -> Option<TrackedAd> {
        let Some(linear) = ad.first_linear() else {
            warn!("ad {:?} has no linear creative, skipping", ad.id);
            return None;
        };

        let mut linear_tracker = Tracker::linear(ad, linear);
        self.wire_tracker(&mut linear_tracker);

        let companion_tracker = ad.first_companion().and_then(|companion| {
            let variation = self.pick_companion_variation(companion)?;
            let mut tracker = Tracker::companion(ad, companion, variation);
            self.wire_tracker(&mut tracker);
            Some(tracker)
        });

        Some(TrackedAd {
            linear: linear_tracker,
            companion: companion_tracker,
        })
    }

    fn wire_tracker(&self, tracker: &mut Tracker) {
        attach_reporting(tracker, self.dispatcher.clone(), self.sink.clone());

        let navigator = self.navigator.clone();
        tracker.on(move |event| {
            if let TrackerEvent::ClickThrough { url } = event {
                navigator.open(url);
            }
        });
    }

    /// The first variation that is a static image and fits the configured
    /// maxima, in source order. Deliberately not a best-fit search.
    fn pick_companion_variation<'a>(&self, companion: &'a Companion) -> Option<&'a Variation> {
        let limits = self.options.companion;
        companion
            .variations
            .iter()
            .filter(|v| v.is_static_image())
            .find(|v| v.width <= limits.max_width && v.height <= limits.max_height)
    }

    fn emit_source_event(&self, kind: &str, source: &str) {
        self.sink
            .emit(EventRecord::new(kind).with_payload("url", source));
    }
}
