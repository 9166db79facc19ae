use crate::beacon::BeaconEmitter;
use crate::macros::{MacroMap, ResolveOptions, UrlTemplate, resolve_url_templates};
use crate::sink::{EventRecord, EventSink};
use crate::tracker::{LifecycleEvent, Tracker, TrackerEvent};
use std::sync::Arc;

/// Subscribe beacon dispatch and observability reporting to a tracker.
///
/// The tracker itself stays a pure state machine; this decorator listens to
/// its events and adds the side effects: one beacon dispatch per accepted
/// event that has tracking URLs configured, and exactly one structured
/// record to the sink per event.
pub fn attach_reporting(
    tracker: &mut Tracker,
    dispatcher: Arc<dyn BeaconEmitter>,
    sink: Arc<dyn EventSink>,
) {
    let ad_id = tracker.ad_id().map(str::to_string);
    let creative_id = tracker.creative_id().map(str::to_string);
    let tracking_urls = tracker.tracking_urls().clone();
    let impressions: Vec<UrlTemplate> = tracker.impressions().iter().map(UrlTemplate::from).collect();
    let error_urls = tracker.error_urls().to_vec();

    tracker.on(move |event| {
        match event {
            TrackerEvent::Lifecycle(lifecycle) => {
                let mut templates: Vec<UrlTemplate> = tracking_urls
                    .get(lifecycle.tracking_key())
                    .map(|urls| urls.iter().map(|u| UrlTemplate::from(u.clone())).collect())
                    .unwrap_or_default();

                // The creative-view confirmation also fires the ad's
                // impression URLs
                if *lifecycle == LifecycleEvent::CreativeView {
                    templates.extend(impressions.iter().cloned());
                }

                if !templates.is_empty() {
                    dispatcher.dispatch(resolve_url_templates(
                        &templates,
                        &MacroMap::new(),
                        &ResolveOptions::default(),
                    ));
                }
            }
            TrackerEvent::Error {
                code,
                is_custom_code,
            } => {
                if !error_urls.is_empty() {
                    let templates: Vec<UrlTemplate> = error_urls
                        .iter()
                        .map(|u| UrlTemplate::from(u.clone()))
                        .collect();
                    let mut macros = MacroMap::new();
                    macros.insert("ERRORCODE".to_string(), code.clone());
                    dispatcher.dispatch(resolve_url_templates(
                        &templates,
                        &macros,
                        &ResolveOptions {
                            is_custom_code: *is_custom_code,
                        },
                    ));
                }
            }
            // Duration, progress and click-through carry no tracking URLs
            _ => (),
        }

        sink.emit(record_for(event, ad_id.clone(), creative_id.clone()));
    });
}

fn record_for(
    event: &TrackerEvent,
    ad_id: Option<String>,
    creative_id: Option<String>,
) -> EventRecord {
    let mut record = EventRecord::new(event.record_kind());
    record.ad_id = ad_id;
    record.creative_id = creative_id;

    match event {
        TrackerEvent::Duration(duration) => record.with_payload("duration", *duration),
        TrackerEvent::Progress(percent) => record.with_payload("progress", *percent),
        TrackerEvent::Error { code, .. } => record.with_payload("code", code.clone()),
        TrackerEvent::ClickThrough { url } => record.with_payload("url", url.clone()),
        TrackerEvent::Lifecycle(_) => record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ad, Impression, Linear, TrackingEvent};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBeacon {
        dispatches: Mutex<Vec<Vec<String>>>,
    }

    impl BeaconEmitter for RecordingBeacon {
        fn dispatch(&self, urls: Vec<String>) {
            self.dispatches.lock().unwrap().push(urls);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<EventRecord>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, record: EventRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn test_ad() -> Ad {
        Ad {
            id: Some("ad-1".to_string()),
            sequence: None,
            title: None,
            ad_system: None,
            impressions: vec![Impression {
                id: None,
                url: "http://ads.example.com/impression".to_string(),
            }],
            error_urls: vec!["http://ads.example.com/error?code=[ERRORCODE]".to_string()],
            creatives: Vec::new(),
        }
    }

    fn test_linear() -> Linear {
        Linear {
            id: Some("cr-1".to_string()),
            tracking_events: vec![
                TrackingEvent {
                    event: "start".to_string(),
                    url: "http://ads.example.com/start?cb=[CACHEBUSTING]".to_string(),
                },
                TrackingEvent {
                    event: "creativeView".to_string(),
                    url: "http://ads.example.com/view".to_string(),
                },
            ],
            ..Linear::default()
        }
    }

    fn wired_tracker() -> (Tracker, Arc<RecordingBeacon>, Arc<RecordingSink>) {
        let mut tracker = Tracker::linear(&test_ad(), &test_linear());
        let beacon = Arc::new(RecordingBeacon::default());
        let sink = Arc::new(RecordingSink::default());
        attach_reporting(&mut tracker, beacon.clone(), sink.clone());
        (tracker, beacon, sink)
    }

    #[test]
    fn repeated_start_dispatches_and_logs_once() {
        let (mut tracker, beacon, sink) = wired_tracker();

        tracker.record_lifecycle_event(LifecycleEvent::Start);
        tracker.record_lifecycle_event(LifecycleEvent::Start);

        let dispatches = beacon.dispatches.lock().unwrap();
        assert_eq!(dispatches.len(), 1);
        assert!(dispatches[0][0].starts_with("http://ads.example.com/start?cb="));
        // The cache buster resolved to eight digits
        let busting = dispatches[0][0].split("cb=").nth(1).unwrap();
        assert_eq!(busting.len(), 8);

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "start");
        assert_eq!(records[0].ad_id.as_deref(), Some("ad-1"));
        assert_eq!(records[0].creative_id.as_deref(), Some("cr-1"));
    }

    #[test]
    fn creative_view_also_fires_impressions() {
        let (mut tracker, beacon, _sink) = wired_tracker();

        tracker.record_lifecycle_event(LifecycleEvent::CreativeView);

        let dispatches = beacon.dispatches.lock().unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(
            dispatches[0],
            vec![
                "http://ads.example.com/view".to_string(),
                "http://ads.example.com/impression".to_string(),
            ]
        );
    }

    #[test]
    fn events_without_urls_still_reach_the_sink() {
        let (mut tracker, beacon, sink) = wired_tracker();

        // No "pause" tracking URL is configured
        tracker.record_lifecycle_event(LifecycleEvent::Pause);

        assert!(beacon.dispatches.lock().unwrap().is_empty());
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "pause");
    }

    #[test]
    fn errors_resolve_the_error_code_macro() {
        let (mut tracker, beacon, sink) = wired_tracker();

        tracker.record_error("405", false);

        let dispatches = beacon.dispatches.lock().unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0], vec!["http://ads.example.com/error?code=405"]);

        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].kind, "error");
        assert_eq!(records[0].payload["code"], "405");
    }

    #[test]
    fn invalid_error_codes_are_rewritten_on_the_wire() {
        let (mut tracker, beacon, sink) = wired_tracker();

        tracker.record_error("broken", false);

        let dispatches = beacon.dispatches.lock().unwrap();
        assert_eq!(dispatches[0], vec!["http://ads.example.com/error?code=900"]);
        // The sink still sees the original code
        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].payload["code"], "broken");
    }

    #[test]
    fn duration_and_progress_records_carry_payloads() {
        let (mut tracker, _beacon, sink) = wired_tracker();

        tracker.register_progress(5.0, Some(20.0));

        let records = sink.records.lock().unwrap();
        let kinds: Vec<&str> = records.iter().map(|r| r.kind.as_str()).collect();
        assert!(kinds.contains(&"duration"));
        assert!(kinds.contains(&"progress"));

        let duration = records.iter().find(|r| r.kind == "duration").unwrap();
        assert_eq!(duration.payload["duration"], 20.0);
        let progress = records.iter().find(|r| r.kind == "progress").unwrap();
        assert_eq!(progress.payload["progress"], 25);
    }
}
