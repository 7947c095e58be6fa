//! Danmaku error types.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while parsing, merging or writing danmu recordings.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// The packed timestamp of a chat message has no recognised shape.
    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    /// A record is missing a mandatory attribute or packed field.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// No strategy could anchor the recording to absolute time.
    #[error("Cannot resolve the start time of '{}'", .0.display())]
    UnresolvableSessionStart(PathBuf),

    /// Two recordings disagree on room id or streamer name.
    #[error("Inconsistent session metadata: {field} '{expected}' != '{found}'")]
    InconsistentSessionMetadata {
        field: &'static str,
        expected: String,
        found: String,
    },

    /// Nothing to merge.
    #[error("No recordings to merge")]
    EmptyInput,

    /// XML parsing errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Input is not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Identity table (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value (regex, time zone, tolerance)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DanmakuError {
    /// Create a malformed timestamp error.
    pub fn malformed_timestamp(msg: impl Into<String>) -> Self {
        Self::MalformedTimestamp(msg.into())
    }

    /// Create a malformed record error.
    pub fn malformed_record(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an inconsistent metadata error.
    pub fn inconsistent(
        field: &'static str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::InconsistentSessionMetadata {
            field,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for DanmakuError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(quick_xml::Error::InvalidAttr(err))
    }
}
