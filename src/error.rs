use thiserror::Error;

/// Errors that can occur when loading or tracking VAST ads
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl TrackingError {
    /// Configuration errors signal caller misuse and must stay distinguishable
    /// from the transport and parse failures the loader recovers from.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TrackingError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
