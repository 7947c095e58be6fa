//! A single danmu recording.
//!
//! The start of a recording is resolved in this order:
//!
//! 1. `BililiveRecorderRecordInfo/@start_time` written by current recorders.
//! 2. A legacy recorder file name (`录制-<room>-<date>-<time>-...`). The first
//!    chat message, when present, gives a more precise start than the name.
//! 3. A file name ending in a 13 digit epoch millisecond stamp.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::{SessionOptions, TimeZoneSetting};
use crate::error::{DanmakuError, Result};
use crate::node::XmlDocument;
use crate::record::{DanmuCategory, DanmuRecord, ParseContext, seconds_to_micros};
use crate::resolver::IdentityResolver;

/// Metadata element written by BililiveRecorder.
pub const RECORD_INFO_ELEMENT: &str = "BililiveRecorderRecordInfo";

/// One parsed recording.
#[derive(Debug, Clone)]
pub struct SessionLog {
    source: PathBuf,
    pub room_id: String,
    pub streamer_name: String,
    pub start_time: DateTime<FixedOffset>,
    events: [Vec<DanmuRecord>; 4],
}

impl SessionLog {
    /// Read and parse a recording from disk.
    pub fn from_path(
        path: &Path,
        options: &SessionOptions,
        resolver: Option<&IdentityResolver>,
    ) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(path, &bytes, options, resolver)
    }

    /// Parse a recording whose content is already in memory. `path` is only
    /// used for its file name.
    pub fn from_bytes(
        path: &Path,
        bytes: &[u8],
        options: &SessionOptions,
        resolver: Option<&IdentityResolver>,
    ) -> Result<Self> {
        let document = XmlDocument::parse(bytes)?;
        Self::from_document(path, &document, options, resolver)
    }

    pub fn from_document(
        path: &Path,
        document: &XmlDocument,
        options: &SessionOptions,
        resolver: Option<&IdentityResolver>,
    ) -> Result<Self> {
        let header = resolve_header(path, document, options)?;
        debug!(
            "Recording {} starts at {} (room '{}', name '{}')",
            path.display(),
            header.start_time,
            header.room_id,
            header.streamer_name
        );

        let ctx = ParseContext {
            start_time: Some(header.start_time),
            resolver,
        };
        let mut events: [Vec<DanmuRecord>; 4] = Default::default();
        for node in &document.children {
            if let Some(category) = DanmuCategory::from_tag(&node.name) {
                events[category.index()].push(DanmuRecord::parse(node, &ctx)?);
            }
        }

        for category in DanmuCategory::ALL {
            let list = &mut events[category.index()];
            if !list.is_sorted_by(|a, b| a.timestamp <= b.timestamp) {
                warn!(
                    "{} has out of order <{category}> records, sorting them",
                    path.display()
                );
                list.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            }
        }

        Ok(Self {
            source: path.to_path_buf(),
            room_id: header.room_id,
            streamer_name: header.streamer_name,
            start_time: header.start_time,
            events,
        })
    }

    /// Build a recording from already parsed records.
    pub fn from_records(
        source: impl Into<PathBuf>,
        room_id: impl Into<String>,
        streamer_name: impl Into<String>,
        start_time: DateTime<FixedOffset>,
        records: impl IntoIterator<Item = DanmuRecord>,
    ) -> Self {
        let mut events: [Vec<DanmuRecord>; 4] = Default::default();
        for record in records {
            events[record.category().index()].push(record);
        }
        for list in &mut events {
            list.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        }
        Self {
            source: source.into(),
            room_id: room_id.into(),
            streamer_name: streamer_name.into(),
            start_time,
            events,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Records of one category, sorted by relative timestamp.
    pub fn events(&self, category: DanmuCategory) -> &[DanmuRecord] {
        &self.events[category.index()]
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.events.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_events(self) -> [Vec<DanmuRecord>; 4] {
        self.events
    }
}

struct SessionHeader {
    room_id: String,
    streamer_name: String,
    start_time: DateTime<FixedOffset>,
}

fn resolve_header(
    path: &Path,
    document: &XmlDocument,
    options: &SessionOptions,
) -> Result<SessionHeader> {
    if let Some(info) = document.find(RECORD_INFO_ELEMENT)
        && let Some(start_time) = info.attribute("start_time")
    {
        let room_id = info
            .attribute("roomid")
            .or_else(|| info.attribute("room_id"))
            .unwrap_or_default();
        return Ok(SessionHeader {
            room_id: room_id.to_string(),
            streamer_name: info.attribute("name").unwrap_or_default().to_string(),
            start_time: parse_start_time(start_time, options.timezone)?,
        });
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(caps) = options.bilirec_pattern.captures(&stem) {
        let start_time = match document.elements(DanmuCategory::Message.tag()).next() {
            Some(first) => {
                let first = DanmuRecord::parse(first, &ParseContext::default())?;
                let absolute = first
                    .message_fields()
                    .map(|f| f.absolute_millis)
                    .unwrap_or_default();
                let micros = absolute
                    .checked_mul(1000)
                    .zip(seconds_to_micros(first.timestamp))
                    .and_then(|(absolute, relative)| absolute.checked_sub(relative))
                    .ok_or_else(|| {
                        DanmakuError::malformed_timestamp(format!(
                            "relative time {} is out of range",
                            first.timestamp
                        ))
                    })?;
                DateTime::from_timestamp_micros(micros).map(|utc| options.timezone.convert(utc))
            }
            None => NaiveDateTime::parse_from_str(
                &format!("{}{}", group(&caps, "date"), group(&caps, "time")),
                "%Y%m%d%H%M%S",
            )
            .ok()
            .and_then(|naive| options.timezone.localize(naive)),
        };
        let start_time =
            start_time.ok_or_else(|| DanmakuError::UnresolvableSessionStart(path.to_path_buf()))?;
        return Ok(SessionHeader {
            room_id: group(&caps, "room_id").to_string(),
            streamer_name: String::new(),
            start_time,
        });
    }

    if let Some(caps) = options.epoch_pattern.captures(&stem) {
        let start_time = group(&caps, "millisec")
            .parse::<i64>()
            .ok()
            .and_then(|millis| options.timezone.from_timestamp_millis(millis))
            .ok_or_else(|| DanmakuError::UnresolvableSessionStart(path.to_path_buf()))?;
        return Ok(SessionHeader {
            room_id: String::new(),
            streamer_name: String::new(),
            start_time,
        });
    }

    Err(DanmakuError::UnresolvableSessionStart(path.to_path_buf()))
}

fn group<'h>(caps: &regex::Captures<'h>, name: &str) -> &'h str {
    caps.name(name).map(|m| m.as_str()).unwrap_or_default()
}

/// Parse a recorder `start_time` attribute.
///
/// Recorders write RFC 3339 with up to seven fraction digits. Values without
/// an offset are read in `timezone`.
pub fn parse_start_time(value: &str, timezone: TimeZoneSetting) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| timezone.localize(naive))
        .ok_or_else(|| DanmakuError::malformed_timestamp(format!("bad start_time '{value}'")))
}
