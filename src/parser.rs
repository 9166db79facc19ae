use crate::error::{Result, TrackingError};
use crate::models::*;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::str::from_utf8;

/// Parse a VAST XML string into a Vast struct
pub fn parse_vast(xml: &str) -> Result<Vast> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut vast = Vast {
        version: String::new(),
        ads: Vec::new(),
        wrappers: Vec::new(),
        error: None,
    };

    // Look for the VAST element
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VAST" => {
                // Extract version from attributes
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"version" {
                        if let Ok(value) = from_utf8(&attr.value) {
                            vast.version = value.to_string();
                        }
                    }
                }

                // If we didn't find a version attribute, error out
                if vast.version.is_empty() {
                    return Err(TrackingError::MissingField("VAST version".to_string()));
                }

                parse_ads(&mut reader, &mut vast)?;
                break;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(vast)
}

/// Parse Ad elements (and a document-level Error) from the VAST XML
fn parse_ads(reader: &mut Reader<&[u8]>, vast: &mut Vast) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Ad" => {
                parse_ad_element(reader, e, vast)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Error" => {
                vast.error = Some(read_text_element(reader)?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VAST" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse a single Ad element into either an inline ad or a wrapper
fn parse_ad_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    vast: &mut Vast,
) -> Result<()> {
    let mut id = None;
    let mut sequence = None;

    for attr in start.attributes().flatten() {
        match attr.key.as_ref() {
            b"id" => {
                if let Ok(value) = from_utf8(&attr.value) {
                    id = Some(value.to_string());
                }
            }
            b"sequence" => {
                if let Ok(value) = from_utf8(&attr.value) {
                    sequence = value.parse::<u32>().ok();
                }
            }
            _ => (),
        }
    }

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"InLine" => {
                    let ad = parse_inline_element(reader, id.clone(), sequence)?;
                    vast.ads.push(ad);
                }
                b"Wrapper" => {
                    let wrapper = parse_wrapper_element(reader)?;
                    vast.wrappers.push(wrapper);
                }
                _ => {
                    // Skip other elements
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse an InLine element into an Ad
fn parse_inline_element(
    reader: &mut Reader<&[u8]>,
    id: Option<String>,
    sequence: Option<u32>,
) -> Result<Ad> {
    let mut ad = Ad {
        id,
        sequence,
        title: None,
        ad_system: None,
        impressions: Vec::new(),
        error_urls: Vec::new(),
        creatives: Vec::new(),
    };

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"AdSystem" => {
                    ad.ad_system = Some(parse_ad_system(reader, e)?);
                }
                b"AdTitle" => {
                    ad.title = Some(read_text_element(reader)?);
                }
                b"Impression" => {
                    ad.impressions.push(parse_impression(reader, e)?);
                }
                b"Error" => {
                    ad.error_urls.push(read_text_element(reader)?);
                }
                b"Creatives" => {
                    ad.creatives = parse_creatives(reader)?;
                }
                _ => {
                    // Skip other elements
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"InLine" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(ad)
}

/// Parse a Wrapper element, flattening its creatives' tracking events
fn parse_wrapper_element(reader: &mut Reader<&[u8]>) -> Result<Wrapper> {
    let mut wrapper = Wrapper::default();

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"VASTAdTagURI" => {
                    wrapper.vast_ad_tag_uri = read_text_element(reader)?;
                }
                b"Impression" => {
                    wrapper.impressions.push(parse_impression(reader, e)?);
                }
                b"Error" => {
                    wrapper.error_urls.push(read_text_element(reader)?);
                }
                b"Creatives" => {
                    // Wrapper creatives exist to carry tracking URLs down the chain
                    for creative in parse_creatives(reader)? {
                        if let Creative::Linear(linear) = creative {
                            wrapper.tracking_events.extend(linear.tracking_events);
                        }
                    }
                }
                _ => {
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Wrapper" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(wrapper)
}

/// Parse a Creatives element
fn parse_creatives(reader: &mut Reader<&[u8]>) -> Result<Vec<Creative>> {
    let mut creatives = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creative" => {
                if let Some(creative) = parse_creative_element(reader, e)? {
                    creatives.push(creative);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(creatives)
}

/// Parse a single Creative element; creatives without a Linear or
/// CompanionAds child are dropped
fn parse_creative_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<Option<Creative>> {
    let mut id = None;

    for attr in start.attributes().flatten() {
        if attr.key.as_ref() == b"id" {
            if let Ok(value) = from_utf8(&attr.value) {
                id = Some(value.to_string());
            }
        }
    }

    let mut creative = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Linear" => {
                    let mut linear = parse_linear_element(reader)?;
                    linear.id = id.clone();
                    creative = Some(Creative::Linear(linear));
                }
                b"CompanionAds" => {
                    let mut companion = parse_companion_ads(reader)?;
                    companion.id = id.clone();
                    creative = Some(Creative::Companion(companion));
                }
                _ => {
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(creative)
}

/// Parse a Linear element
fn parse_linear_element(reader: &mut Reader<&[u8]>) -> Result<Linear> {
    let mut linear = Linear::default();

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Duration" => {
                    linear.duration = Some(read_text_element(reader)?);
                }
                b"MediaFiles" => {
                    linear.media_files = parse_media_files(reader)?;
                }
                b"TrackingEvents" => {
                    linear.tracking_events = parse_tracking_events(reader)?;
                }
                b"VideoClicks" => {
                    parse_video_clicks(reader, &mut linear)?;
                }
                _ => {
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(linear)
}

/// Parse a MediaFiles element
fn parse_media_files(reader: &mut Reader<&[u8]>) -> Result<Vec<MediaFile>> {
    let mut media_files = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFile" => {
                let mut media_file = MediaFile {
                    url: String::new(),
                    mime_type: None,
                    bitrate: None,
                    width: None,
                    height: None,
                    delivery: None,
                };

                for attr in e.attributes().flatten() {
                    let Ok(value) = from_utf8(&attr.value) else {
                        continue;
                    };
                    match attr.key.as_ref() {
                        b"type" => media_file.mime_type = Some(value.to_string()),
                        b"bitrate" => media_file.bitrate = value.parse().ok(),
                        b"width" => media_file.width = value.parse().ok(),
                        b"height" => media_file.height = value.parse().ok(),
                        b"delivery" => media_file.delivery = Some(value.to_string()),
                        _ => (),
                    }
                }

                media_file.url = read_text_element(reader)?;
                media_files.push(media_file);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(media_files)
}

/// Parse a TrackingEvents element; Tracking entries without an event
/// attribute are dropped
fn parse_tracking_events(reader: &mut Reader<&[u8]>) -> Result<Vec<TrackingEvent>> {
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Tracking" => {
                let mut event = None;

                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"event" {
                        if let Ok(value) = from_utf8(&attr.value) {
                            event = Some(value.to_string());
                        }
                    }
                }

                let url = read_text_element(reader)?;
                if let Some(event) = event {
                    events.push(TrackingEvent { event, url });
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(events)
}

/// Parse a VideoClicks element into the linear creative
fn parse_video_clicks(reader: &mut Reader<&[u8]>, linear: &mut Linear) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"ClickThrough" => {
                    linear.click_through = Some(read_text_element(reader)?);
                }
                b"ClickTracking" => {
                    linear.click_trackings.push(read_text_element(reader)?);
                }
                _ => {
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VideoClicks" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse a CompanionAds element
fn parse_companion_ads(reader: &mut Reader<&[u8]>) -> Result<Companion> {
    let mut companion = Companion::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Companion" => {
                companion.variations.push(parse_companion_element(reader, e)?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"CompanionAds" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(companion)
}

/// Parse a single Companion element into a Variation
fn parse_companion_element(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Variation> {
    let mut variation = Variation::default();

    for attr in start.attributes().flatten() {
        let Ok(value) = from_utf8(&attr.value) else {
            continue;
        };
        match attr.key.as_ref() {
            b"id" => variation.id = Some(value.to_string()),
            b"width" => variation.width = value.parse().unwrap_or(0),
            b"height" => variation.height = value.parse().unwrap_or(0),
            _ => (),
        }
    }

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"StaticResource" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"creativeType" {
                            if let Ok(value) = from_utf8(&attr.value) {
                                variation.creative_type = Some(value.to_string());
                            }
                        }
                    }
                    variation.resource_type = "StaticResource".to_string();
                    variation.resource = read_text_element(reader)?;
                }
                b"IFrameResource" => {
                    variation.resource_type = "IFrameResource".to_string();
                    variation.resource = read_text_element(reader)?;
                }
                b"HTMLResource" => {
                    variation.resource_type = "HTMLResource".to_string();
                    variation.resource = read_text_element(reader)?;
                }
                b"CompanionClickThrough" => {
                    variation.click_through = Some(read_text_element(reader)?);
                }
                b"TrackingEvents" => {
                    variation.tracking_events = parse_tracking_events(reader)?;
                }
                _ => {
                    skip_element(reader)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Companion" => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(variation)
}

/// Parse AdSystem element
fn parse_ad_system(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<AdSystem> {
    let mut ad_system = AdSystem {
        name: String::new(),
        version: None,
    };

    for attr in start.attributes().flatten() {
        if attr.key.as_ref() == b"version" {
            if let Ok(value) = from_utf8(&attr.value) {
                ad_system.version = Some(value.to_string());
            }
        }
    }

    ad_system.name = read_text_element(reader)?;

    Ok(ad_system)
}

/// Parse Impression element
fn parse_impression(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Impression> {
    let mut impression = Impression {
        id: None,
        url: String::new(),
    };

    for attr in start.attributes().flatten() {
        if attr.key.as_ref() == b"id" {
            if let Ok(value) = from_utf8(&attr.value) {
                impression.id = Some(value.to_string());
            }
        }
    }

    impression.url = read_text_element(reader)?;

    Ok(impression)
}

/// Helper function to read the text content of an XML element
fn read_text_element(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                text = e.unescape()?.into_owned();
            }
            Ok(Event::CData(e)) => {
                if let Ok(value) = from_utf8(&e) {
                    text = value.trim().to_string();
                }
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(text)
}

/// Helper function to skip the current element and all its children
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<()> {
    let mut buf = Vec::new();
    // The caller has already consumed the element's start tag
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => {
                return Err(TrackingError::Other("Unexpected end of file".to_string()));
            }
            Err(e) => return Err(TrackingError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE_VAST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="3.0">
  <Ad id="ad-1" sequence="1">
    <InLine>
      <AdSystem version="1.0">Example Ads</AdSystem>
      <AdTitle>Sample Linear Ad</AdTitle>
      <Impression id="imp-1"><![CDATA[http://ads.example.com/impression]]></Impression>
      <Error><![CDATA[http://ads.example.com/error?code=[ERRORCODE]]]></Error>
      <Creatives>
        <Creative id="cr-linear">
          <Linear>
            <Duration>00:00:30</Duration>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[http://ads.example.com/start]]></Tracking>
              <Tracking event="midpoint"><![CDATA[http://ads.example.com/midpoint]]></Tracking>
            </TrackingEvents>
            <VideoClicks>
              <ClickThrough><![CDATA[http://advertiser.example.com/landing]]></ClickThrough>
              <ClickTracking><![CDATA[http://ads.example.com/click]]></ClickTracking>
            </VideoClicks>
            <MediaFiles>
              <MediaFile delivery="progressive" type="video/mp4" bitrate="600" width="640" height="360"><![CDATA[http://cdn.example.com/ad.mp4]]></MediaFile>
            </MediaFiles>
          </Linear>
        </Creative>
        <Creative id="cr-companion">
          <CompanionAds>
            <Companion id="comp-1" width="300" height="250">
              <StaticResource creativeType="image/png"><![CDATA[http://cdn.example.com/banner.png]]></StaticResource>
              <CompanionClickThrough><![CDATA[http://advertiser.example.com/banner]]></CompanionClickThrough>
              <TrackingEvents>
                <Tracking event="creativeView"><![CDATA[http://ads.example.com/companion-view]]></Tracking>
              </TrackingEvents>
            </Companion>
          </CompanionAds>
        </Creative>
      </Creatives>
    </InLine>
  </Ad>
</VAST>"#;

    const WRAPPER_VAST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="3.0">
  <Ad id="wrapper-1">
    <Wrapper>
      <AdSystem>Wrapper System</AdSystem>
      <VASTAdTagURI><![CDATA[http://ads.example.com/next.xml]]></VASTAdTagURI>
      <Impression><![CDATA[http://ads.example.com/wrapper-impression]]></Impression>
      <Error><![CDATA[http://ads.example.com/wrapper-error]]></Error>
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
</VAST>"#;

    #[test]
    fn parses_inline_ad() {
        let vast = parse_vast(INLINE_VAST).unwrap();
        assert_eq!(vast.version, "3.0");
        assert_eq!(vast.ads.len(), 1);
        assert!(vast.wrappers.is_empty());

        let ad = &vast.ads[0];
        assert_eq!(ad.id.as_deref(), Some("ad-1"));
        assert_eq!(ad.sequence, Some(1));
        assert_eq!(ad.title.as_deref(), Some("Sample Linear Ad"));
        assert_eq!(ad.impressions.len(), 1);
        assert_eq!(ad.impressions[0].url, "http://ads.example.com/impression");
        assert_eq!(
            ad.error_urls,
            vec!["http://ads.example.com/error?code=[ERRORCODE]"]
        );
        assert_eq!(ad.creatives.len(), 2);
    }

    #[test]
    fn parses_linear_creative() {
        let vast = parse_vast(INLINE_VAST).unwrap();
        let linear = vast.ads[0].first_linear().unwrap();

        assert_eq!(linear.id.as_deref(), Some("cr-linear"));
        assert_eq!(linear.duration_seconds(), Some(30.0));
        assert_eq!(linear.tracking_events.len(), 2);
        assert_eq!(linear.tracking_events[0].event, "start");
        assert_eq!(
            linear.click_through.as_deref(),
            Some("http://advertiser.example.com/landing")
        );
        assert_eq!(linear.click_trackings, vec!["http://ads.example.com/click"]);
        assert_eq!(linear.media_files.len(), 1);
        assert_eq!(linear.media_files[0].url, "http://cdn.example.com/ad.mp4");
        assert_eq!(linear.media_files[0].bitrate, Some(600));
    }

    #[test]
    fn parses_companion_creative() {
        let vast = parse_vast(INLINE_VAST).unwrap();
        let companion = vast.ads[0].first_companion().unwrap();

        assert_eq!(companion.id.as_deref(), Some("cr-companion"));
        assert_eq!(companion.variations.len(), 1);

        let variation = &companion.variations[0];
        assert_eq!(variation.width, 300);
        assert_eq!(variation.height, 250);
        assert!(variation.is_static_image());
        assert_eq!(variation.resource, "http://cdn.example.com/banner.png");
        assert_eq!(variation.tracking_events.len(), 1);
    }

    #[test]
    fn parses_wrapper_ad() {
        let vast = parse_vast(WRAPPER_VAST).unwrap();
        assert!(vast.ads.is_empty());
        assert_eq!(vast.wrappers.len(), 1);

        let wrapper = &vast.wrappers[0];
        assert_eq!(wrapper.vast_ad_tag_uri, "http://ads.example.com/next.xml");
        assert_eq!(wrapper.impressions.len(), 1);
        assert_eq!(wrapper.error_urls, vec!["http://ads.example.com/wrapper-error"]);
        assert_eq!(wrapper.tracking_events.len(), 1);
        assert_eq!(
            wrapper.tracking_events[0].url,
            "http://ads.example.com/wrapper-start"
        );
    }

    #[test]
    fn missing_version_is_an_error() {
        let result = parse_vast(r#"<VAST><Ad id="x"></Ad></VAST>"#);
        assert!(matches!(result, Err(TrackingError::MissingField(_))));
    }
}
