use crate::models::Impression;
use chrono::{SecondsFormat, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::{Rng, thread_rng};
use std::collections::HashMap;

/// Everything except RFC 3986 unreserved characters is percent-encoded.
/// This also covers `! ' ( ) *`, which common component encoders leave bare.
const MACRO_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Macro name to value mapping; keys are case-sensitive
pub type MacroMap = HashMap<String, String>;

/// A tracking URL template, either a bare URL string or an entry object
/// carrying the URL alongside an identifier
#[derive(Debug, Clone, PartialEq)]
pub enum UrlTemplate {
    Url(String),
    Entry { id: Option<String>, url: Option<String> },
}

impl UrlTemplate {
    /// The raw URL carried by this template; entries without one yield None
    /// and are dropped during resolution
    fn url(&self) -> Option<&str> {
        match self {
            UrlTemplate::Url(url) => Some(url),
            UrlTemplate::Entry { url, .. } => url.as_deref(),
        }
    }
}

impl From<&str> for UrlTemplate {
    fn from(url: &str) -> Self {
        UrlTemplate::Url(url.to_string())
    }
}

impl From<String> for UrlTemplate {
    fn from(url: String) -> Self {
        UrlTemplate::Url(url)
    }
}

impl From<&Impression> for UrlTemplate {
    fn from(impression: &Impression) -> Self {
        UrlTemplate::Entry {
            id: impression.id.clone(),
            url: Some(impression.url.clone()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveOptions {
    /// Custom error codes bypass the three-digit ERRORCODE check
    pub is_custom_code: bool,
}

/// Resolve tracking URL templates into ready-to-send URLs.
///
/// Substitutes every `[MACRO]` and `%%MACRO%%` occurrence with the
/// percent-encoded macro value, injecting the CACHEBUSTING / TIMESTAMP /
/// RANDOM macros on every call. Unmatched placeholders are left verbatim.
pub fn resolve_url_templates(
    templates: &[UrlTemplate],
    macros: &MacroMap,
    options: &ResolveOptions,
) -> Vec<String> {
    let mut macros = macros.clone();

    // Set default value for invalid ERRORCODE
    if let Some(code) = macros.get("ERRORCODE") {
        if !options.is_custom_code && !is_standard_error_code(code) {
            macros.insert("ERRORCODE".to_string(), "900".to_string());
        }
    }

    // Calc random/time based macros; these always win over caller values
    let cache_busting = format!("{:08}", thread_rng().gen_range(0..100_000_000u32));
    macros.insert(
        "TIMESTAMP".to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    macros.insert("RANDOM".to_string(), cache_busting.clone());
    macros.insert("random".to_string(), cache_busting.clone());
    macros.insert("CACHEBUSTING".to_string(), cache_busting);

    let encoded: MacroMap = macros
        .iter()
        .map(|(key, value)| (key.clone(), encode_rfc3986(value)))
        .collect();

    templates
        .iter()
        .filter_map(UrlTemplate::url)
        .map(|url| replace_url_macros(url, &encoded))
        .collect()
}

/// Standard VAST error codes are exactly three decimal digits
fn is_standard_error_code(value: &str) -> bool {
    value.len() == 3 && value.bytes().all(|b| b.is_ascii_digit())
}

fn replace_url_macros(url: &str, macros: &MacroMap) -> String {
    let mut resolved = url.to_string();
    for (key, value) in macros {
        resolved = resolved
            .replace(&format!("[{key}]"), value)
            .replace(&format!("%%{key}%%"), value);
    }
    resolved
}

/// Percent-encode a macro value per RFC 3986
pub fn encode_rfc3986(value: &str) -> String {
    utf8_percent_encode(value, MACRO_ENCODE_SET).to_string()
}
