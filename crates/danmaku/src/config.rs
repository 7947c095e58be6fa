//! Merge configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DanmakuError, Result};

/// Default duplicate window in seconds.
///
/// Some archive sites record danmu roughly 100 seconds ahead of the actual
/// live start, so the window has to absorb that relay delay.
pub const DEFAULT_TOLERANCE_SECS: f64 = 120.0;

/// Legacy BililiveRecorder file stem: `录制-<room>-<yyyymmdd>-<hhmmss>-<title>`.
pub const DEFAULT_BILIREC_FILENAME_PATTERN: &str =
    r"^录制-(?P<room_id>[0-9]+)-(?P<date>20[0-9]{6})-(?P<time>[0-9]{6})-.*";

/// Archive download file stem ending in a 13 digit epoch millisecond stamp.
pub const DEFAULT_EPOCH_FILENAME_PATTERN: &str = r"^.*_(?P<millisec>1[0-9]{12})";

/// Configuration for parsing and merging danmu recordings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Two events are duplicate candidates only when closer than this.
    pub tolerance_secs: f64,
    /// Identity table behaviour.
    pub identity_table: IdentityTableConfig,
    /// Zone used for start times that carry no offset (file names).
    pub timezone: TimeZoneSetting,
    /// Pattern for legacy recorder file stems.
    pub bilirec_filename_pattern: String,
    /// Pattern for file stems carrying an epoch millisecond start.
    pub epoch_filename_pattern: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            identity_table: IdentityTableConfig::default(),
            timezone: TimeZoneSetting::Local,
            bilirec_filename_pattern: DEFAULT_BILIREC_FILENAME_PATTERN.to_string(),
            epoch_filename_pattern: DEFAULT_EPOCH_FILENAME_PATTERN.to_string(),
        }
    }
}

impl MergeConfig {
    /// Check values that serde cannot validate on its own.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance_secs.is_finite() || self.tolerance_secs <= 0.0 {
            return Err(DanmakuError::invalid_config(format!(
                "tolerance must be a positive number of seconds, got {}",
                self.tolerance_secs
            )));
        }
        self.session_options().map(|_| ())
    }

    /// Build the options used when parsing recordings.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let bilirec = compile_pattern(
            &self.bilirec_filename_pattern,
            &["room_id", "date", "time"],
        )?;
        let epoch = compile_pattern(&self.epoch_filename_pattern, &["millisec"])?;
        Ok(SessionOptions {
            timezone: self.timezone,
            bilirec_pattern: bilirec,
            epoch_pattern: epoch,
        })
    }
}

fn compile_pattern(pattern: &str, groups: &[&str]) -> Result<Regex> {
    let re = Regex::new(pattern)
        .map_err(|e| DanmakuError::invalid_config(format!("bad pattern '{pattern}': {e}")))?;
    for group in groups {
        if !re.capture_names().flatten().any(|name| name == *group) {
            return Err(DanmakuError::invalid_config(format!(
                "pattern '{pattern}' has no named group '{group}'"
            )));
        }
    }
    Ok(re)
}

/// Toggles for the checksum → identity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityTableConfig {
    /// Resolve checksum identities from the loaded table while parsing.
    pub read: bool,
    /// Record newly discovered links while merging.
    pub update: bool,
    /// Persist the table after the merge.
    pub write: bool,
}

impl Default for IdentityTableConfig {
    fn default() -> Self {
        Self {
            read: true,
            update: true,
            write: true,
        }
    }
}

impl IdentityTableConfig {
    pub fn disabled() -> Self {
        Self {
            read: false,
            update: false,
            write: false,
        }
    }
}

/// Time zone applied to naive timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeZoneSetting {
    /// The zone of the machine running the merge.
    #[default]
    Local,
    /// A fixed UTC offset.
    Fixed(FixedOffset),
}

impl TimeZoneSetting {
    /// Attach this zone to a naive local date time.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            Self::Fixed(offset) => offset.from_local_datetime(&naive).single(),
        }
    }

    /// Convert an instant to this zone.
    pub fn convert(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Self::Local => instant.with_timezone(&Local).fixed_offset(),
            Self::Fixed(offset) => instant.with_timezone(offset),
        }
    }

    /// Instant for an epoch millisecond stamp, expressed in this zone.
    pub fn from_timestamp_millis(&self, millis: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(millis).map(|utc| self.convert(utc))
    }
}

impl FromStr for TimeZoneSetting {
    type Err = DanmakuError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(Self::Fixed(Utc.fix()));
        }
        s.parse::<FixedOffset>()
            .map(Self::Fixed)
            .map_err(|e| DanmakuError::invalid_config(format!("bad time zone '{s}': {e}")))
    }
}

impl TryFrom<String> for TimeZoneSetting {
    type Error = DanmakuError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeZoneSetting> for String {
    fn from(value: TimeZoneSetting) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Compiled options used by [`crate::SessionLog`] parsing.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timezone: TimeZoneSetting,
    pub bilirec_pattern: Regex,
    pub epoch_pattern: Regex,
}

impl Default for SessionOptions {
    fn default() -> Self {
        MergeConfig::default()
            .session_options()
            .expect("default patterns are valid")
    }
}

impl SessionOptions {
    pub fn with_timezone(mut self, timezone: TimeZoneSetting) -> Self {
        self.timezone = timezone;
        self
    }
}
