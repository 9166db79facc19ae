use crate::macros::{MacroMap, ResolveOptions, UrlTemplate, resolve_url_templates};
use crate::models::{Ad, Companion, Impression, Linear, Variation, tracking_url_map};
use std::collections::HashMap;

/// Lifecycle events the player confirms directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    CreativeView,
    Start,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    Complete,
    Mute,
    Unmute,
    Pause,
    Resume,
    Fullscreen,
}

impl LifecycleEvent {
    /// Key used by VAST TrackingEvents elements
    pub fn tracking_key(&self) -> &'static str {
        match self {
            LifecycleEvent::CreativeView => "creativeView",
            LifecycleEvent::Start => "start",
            LifecycleEvent::FirstQuartile => "firstQuartile",
            LifecycleEvent::Midpoint => "midpoint",
            LifecycleEvent::ThirdQuartile => "thirdQuartile",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Mute => "mute",
            LifecycleEvent::Unmute => "unmute",
            LifecycleEvent::Pause => "pause",
            LifecycleEvent::Resume => "resume",
            LifecycleEvent::Fullscreen => "fullscreen",
        }
    }

    /// Whether the event may fire at most once per tracker lifetime
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::CreativeView
                | LifecycleEvent::Start
                | LifecycleEvent::FirstQuartile
                | LifecycleEvent::Midpoint
                | LifecycleEvent::ThirdQuartile
                | LifecycleEvent::Complete
        )
    }
}

/// Event emitted to tracker subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Lifecycle(LifecycleEvent),
    /// First determination of the asset duration, in seconds
    Duration(f64),
    /// Informational progress sample as a rounded percentage
    Progress(u32),
    Error {
        code: String,
        is_custom_code: bool,
    },
    ClickThrough {
        url: String,
    },
}

impl TrackerEvent {
    /// Record kind written to the observability sink
    pub fn record_kind(&self) -> &'static str {
        match self {
            TrackerEvent::Lifecycle(LifecycleEvent::CreativeView) => "creative-view",
            TrackerEvent::Lifecycle(LifecycleEvent::Start) => "start",
            TrackerEvent::Lifecycle(LifecycleEvent::FirstQuartile) => "first-quartile",
            TrackerEvent::Lifecycle(LifecycleEvent::Midpoint) => "midpoint",
            TrackerEvent::Lifecycle(LifecycleEvent::ThirdQuartile) => "third-quartile",
            TrackerEvent::Lifecycle(LifecycleEvent::Complete) => "complete",
            TrackerEvent::Lifecycle(LifecycleEvent::Mute) => "mute",
            TrackerEvent::Lifecycle(LifecycleEvent::Unmute) => "unmute",
            TrackerEvent::Lifecycle(LifecycleEvent::Pause) => "pause",
            TrackerEvent::Lifecycle(LifecycleEvent::Resume) => "resume",
            TrackerEvent::Lifecycle(LifecycleEvent::Fullscreen) => "fullscreen",
            TrackerEvent::Duration(_) => "duration",
            TrackerEvent::Progress(_) => "progress",
            TrackerEvent::Error { .. } => "error",
            TrackerEvent::ClickThrough { .. } => "click-through",
        }
    }
}

/// One-shot acceptance flags; each covered event fires at most once per
/// tracker lifetime
#[derive(Debug, Default, Clone)]
struct FiredFlags {
    creative_view: bool,
    start: bool,
    first_quartile: bool,
    midpoint: bool,
    third_quartile: bool,
    complete: bool,
    duration: bool,
}

impl FiredFlags {
    /// Returns true the first time a one-shot event is accepted and false on
    /// replays; toggleable events are always accepted
    fn accept(&mut self, event: LifecycleEvent) -> bool {
        let flag = match event {
            LifecycleEvent::CreativeView => &mut self.creative_view,
            LifecycleEvent::Start => &mut self.start,
            LifecycleEvent::FirstQuartile => &mut self.first_quartile,
            LifecycleEvent::Midpoint => &mut self.midpoint,
            LifecycleEvent::ThirdQuartile => &mut self.third_quartile,
            LifecycleEvent::Complete => &mut self.complete,
            _ => return true,
        };
        if *flag {
            return false;
        }
        *flag = true;
        true
    }
}

/// Per-(ad, creative) tracking state machine.
///
/// Owns the one-shot event flags and the asset duration, derives quartile
/// milestones from playback progress, and notifies subscribers of every
/// accepted event. Side effects (beacon dispatch, observability records) are
/// attached by subscription, not built in.
pub struct Tracker {
    ad_id: Option<String>,
    creative_id: Option<String>,
    tracking_urls: HashMap<String, Vec<String>>,
    impressions: Vec<Impression>,
    error_urls: Vec<String>,
    click_through: Option<String>,
    asset_duration: Option<f64>,
    position: f64,
    fired: FiredFlags,
    listeners: Vec<Box<dyn Fn(&TrackerEvent)>>,
}

impl Tracker {
    /// Tracker for a linear creative
    pub fn linear(ad: &Ad, creative: &Linear) -> Self {
        Tracker {
            ad_id: ad.id.clone(),
            creative_id: creative.id.clone(),
            tracking_urls: tracking_url_map(&creative.tracking_events),
            impressions: ad.impressions.clone(),
            error_urls: ad.error_urls.clone(),
            click_through: creative.click_through.clone(),
            asset_duration: None,
            position: 0.0,
            fired: FiredFlags::default(),
            listeners: Vec::new(),
        }
    }

    /// Tracker for one displayed variation of a companion creative
    pub fn companion(ad: &Ad, creative: &Companion, variation: &Variation) -> Self {
        Tracker {
            ad_id: ad.id.clone(),
            creative_id: creative.id.clone(),
            tracking_urls: tracking_url_map(&variation.tracking_events),
            // Impressions belong to the linear part of the ad
            impressions: Vec::new(),
            error_urls: ad.error_urls.clone(),
            click_through: variation.click_through.clone(),
            asset_duration: None,
            position: 0.0,
            fired: FiredFlags::default(),
            listeners: Vec::new(),
        }
    }

    /// Subscribe to tracker events; listeners run synchronously in
    /// subscription order
    pub fn on<F>(&mut self, listener: F)
    where
        F: Fn(&TrackerEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn ad_id(&self) -> Option<&str> {
        self.ad_id.as_deref()
    }

    pub fn creative_id(&self) -> Option<&str> {
        self.creative_id.as_deref()
    }

    /// Asset duration in seconds, None until first derived from a progress
    /// sample
    pub fn asset_duration(&self) -> Option<f64> {
        self.asset_duration
    }

    pub(crate) fn tracking_urls(&self) -> &HashMap<String, Vec<String>> {
        &self.tracking_urls
    }

    pub(crate) fn impressions(&self) -> &[Impression] {
        &self.impressions
    }

    pub(crate) fn error_urls(&self) -> &[String] {
        &self.error_urls
    }

    /// Record a playback progress sample.
    ///
    /// The first sample carrying a usable duration emits a single `duration`
    /// event; later samples keep `asset_duration` current (it never
    /// decreases) without emitting again. While the duration is known and
    /// positive, every sample emits an informational progress percentage and
    /// may advance the quartile milestones.
    pub fn register_progress(&mut self, current_time: f64, duration: Option<f64>) {
        if let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) {
            match self.asset_duration {
                None => {
                    self.asset_duration = Some(duration);
                    if !self.fired.duration {
                        self.fired.duration = true;
                        self.emit(&TrackerEvent::Duration(duration));
                    }
                }
                Some(known) if duration > known => {
                    self.asset_duration = Some(duration);
                }
                _ => (),
            }
        }

        self.position = current_time;

        let Some(asset_duration) = self.asset_duration else {
            return;
        };

        let ratio = current_time / asset_duration;
        self.emit(&TrackerEvent::Progress((ratio * 100.0).round() as u32));

        // Milestones are monotonic: a jump forward fires every one crossed
        if current_time > 0.0 {
            self.confirm(LifecycleEvent::Start);
        }
        if ratio >= 0.25 {
            self.confirm(LifecycleEvent::FirstQuartile);
        }
        if ratio >= 0.5 {
            self.confirm(LifecycleEvent::Midpoint);
        }
        if ratio >= 0.75 {
            self.confirm(LifecycleEvent::ThirdQuartile);
        }
        if ratio >= 1.0 {
            self.confirm(LifecycleEvent::Complete);
        }
    }

    /// Record a player-confirmed lifecycle event. Replays of one-shot events
    /// are silent no-ops; toggleable events always pass through.
    pub fn record_lifecycle_event(&mut self, event: LifecycleEvent) {
        self.confirm(event);
    }

    /// Record a playback error. Errors never consume one-shot flags and may
    /// occur any number of times.
    pub fn record_error(&mut self, code: &str, is_custom_code: bool) {
        self.emit(&TrackerEvent::Error {
            code: code.to_string(),
            is_custom_code,
        });
    }

    /// Resolve and forward the click-through URL to subscribers (the
    /// navigation collaborator); never dispatched as a beacon. The creative's
    /// configured URL wins over the caller-supplied fallback; with neither,
    /// this is a no-op.
    pub fn record_click_through(&mut self, fallback_url: Option<&str>) {
        let Some(template) = self.click_through.as_deref().or(fallback_url) else {
            return;
        };
        let resolved = resolve_url_templates(
            &[UrlTemplate::from(template)],
            &MacroMap::new(),
            &ResolveOptions::default(),
        );
        if let Some(url) = resolved.into_iter().next() {
            self.emit(&TrackerEvent::ClickThrough { url });
        }
    }

    fn confirm(&mut self, event: LifecycleEvent) {
        if self.fired.accept(event) {
            self.emit(&TrackerEvent::Lifecycle(event));
        }
    }

    fn emit(&self, event: &TrackerEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}
