use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a parsed VAST document, reduced to what ad tracking needs
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Vast {
    /// The VAST version (e.g., "2.0", "3.0", "4.0", etc.)
    pub version: String,

    /// Inline ads ready for tracking
    pub ads: Vec<Ad>,

    /// Wrapper ads pointing at further VAST documents
    pub wrappers: Vec<Wrapper>,

    /// Document-level error tracking URL if present
    pub error: Option<String>,
}

/// Represents an inline Ad with its creatives and tracking URLs
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Ad {
    /// The ad ID
    pub id: Option<String>,

    /// The ad sequence number (for ad pods)
    pub sequence: Option<u32>,

    /// The ad title
    pub title: Option<String>,

    /// The ad system name and version
    pub ad_system: Option<AdSystem>,

    /// Impression tracking URLs
    pub impressions: Vec<Impression>,

    /// Error tracking URLs
    pub error_urls: Vec<String>,

    /// Creative elements, in document order
    pub creatives: Vec<Creative>,
}

impl Ad {
    /// The first linear creative of this ad, if any
    pub fn first_linear(&self) -> Option<&Linear> {
        self.creatives.iter().find_map(Creative::as_linear)
    }

    /// The first companion creative of this ad, if any
    pub fn first_companion(&self) -> Option<&Companion> {
        self.creatives.iter().find_map(Creative::as_companion)
    }
}

/// Represents the ad system information
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AdSystem {
    /// The ad system name
    pub name: String,

    /// The ad system version
    pub version: Option<String>,
}

/// Represents an impression tracking URL
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Impression {
    /// The impression ID
    pub id: Option<String>,

    /// The impression tracking URL
    pub url: String,
}

/// Represents a creative element
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum Creative {
    /// In-stream video creative
    Linear(Linear),

    /// Static adjunct creative displayed alongside the video
    Companion(Companion),
}

impl Creative {
    pub fn as_linear(&self) -> Option<&Linear> {
        match self {
            Creative::Linear(linear) => Some(linear),
            _ => None,
        }
    }

    pub fn as_companion(&self) -> Option<&Companion> {
        match self {
            Creative::Companion(companion) => Some(companion),
            _ => None,
        }
    }
}

/// Represents a linear (in-stream video) creative
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Linear {
    /// The creative ID
    pub id: Option<String>,

    /// The declared duration of the ad (e.g., "00:00:30")
    pub duration: Option<String>,

    /// Media files
    pub media_files: Vec<MediaFile>,

    /// Tracking events
    pub tracking_events: Vec<TrackingEvent>,

    /// The click-through URL
    pub click_through: Option<String>,

    /// Click tracking URLs
    pub click_trackings: Vec<String>,
}

impl Linear {
    /// The declared duration in seconds, if it parses
    pub fn duration_seconds(&self) -> Option<f64> {
        parse_duration(self.duration.as_deref()?)
    }
}

/// Represents a media file
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct MediaFile {
    /// The media file URL
    pub url: String,

    /// The media file MIME type
    pub mime_type: Option<String>,

    /// The media file bitrate
    pub bitrate: Option<u32>,

    /// The media file width
    pub width: Option<u32>,

    /// The media file height
    pub height: Option<u32>,

    /// The media file delivery type (progressive or streaming)
    pub delivery: Option<String>,
}

/// Represents a tracking event
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TrackingEvent {
    /// The event type (e.g., "start", "firstQuartile", "midpoint", "thirdQuartile", "complete", etc.)
    pub event: String,

    /// The tracking URL
    pub url: String,
}

/// Represents a companion creative with its display variations
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Companion {
    /// The creative ID
    pub id: Option<String>,

    /// The available variations, in document order
    pub variations: Vec<Variation>,
}

/// Represents one displayable variation of a companion creative
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Variation {
    /// The variation ID
    pub id: Option<String>,

    /// The variation width
    pub width: u32,

    /// The variation height
    pub height: u32,

    /// The asset type (StaticResource, IFrameResource, or HTMLResource)
    pub resource_type: String,

    /// The resource URL or HTML content
    pub resource: String,

    /// The MIME type of a static resource
    pub creative_type: Option<String>,

    /// The click-through URL
    pub click_through: Option<String>,

    /// Companion tracking events
    pub tracking_events: Vec<TrackingEvent>,
}

impl Variation {
    /// Whether this variation is a static image asset
    pub fn is_static_image(&self) -> bool {
        self.resource_type == "StaticResource"
            && self
                .creative_type
                .as_deref()
                .is_some_and(|t| t.starts_with("image"))
    }
}

/// Represents a Wrapper ad, which references another VAST document
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wrapper {
    /// The URL of the next VAST document
    pub vast_ad_tag_uri: String,

    /// Impression tracking URLs
    pub impressions: Vec<Impression>,

    /// Error tracking URLs
    pub error_urls: Vec<String>,

    /// Tracking events collected from the wrapper's creatives
    pub tracking_events: Vec<TrackingEvent>,
}

/// Group tracking URLs by event name
pub fn tracking_url_map(events: &[TrackingEvent]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for event in events {
        map.entry(event.event.clone())
            .or_default()
            .push(event.url.clone());
    }
    map
}

/// Parse a VAST duration ("HH:MM:SS" or "HH:MM:SS.mmm") into seconds
pub fn parse_duration(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = parts.next()?.trim().parse().ok()?;
    let seconds: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
