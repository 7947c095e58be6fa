//! Danmu record types.
//!
//! A [`DanmuRecord`] is one event of a recording: a chat message (`<d>`), a
//! super chat (`<sc>`), a gift (`<gift>`) or a guard purchase (`<guard>`).
//! Its timestamp is relative to the start of the owning recording until the
//! merge engine moves it onto the shared timeline.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{DanmakuError, Result};
use crate::node::XmlNode;
use crate::resolver::IdentityResolver;

/// Colour written by clients that do not record styling (white).
pub const DEFAULT_COLOUR: &str = "16777215";

/// Position written by clients that do not record styling (scrolling).
pub const DEFAULT_POSITION: &str = "1";

/// Font size field of the packed parameter string. Always 25.
const FONT_SIZE: &str = "25";

/// Category of a danmu record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanmuCategory {
    /// Regular chat message
    Message,
    /// Super chat (paid highlighted message)
    SuperChat,
    /// Gift/donation
    Gift,
    /// Guard (membership) purchase
    GuardPurchase,
}

impl DanmuCategory {
    /// All categories, in merge order.
    pub const ALL: [DanmuCategory; 4] = [
        DanmuCategory::Message,
        DanmuCategory::SuperChat,
        DanmuCategory::Gift,
        DanmuCategory::GuardPurchase,
    ];

    /// XML element name.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Message => "d",
            Self::SuperChat => "sc",
            Self::Gift => "gift",
            Self::GuardPurchase => "guard",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "d" => Some(Self::Message),
            "sc" => Some(Self::SuperChat),
            "gift" => Some(Self::Gift),
            "guard" => Some(Self::GuardPurchase),
            _ => None,
        }
    }

    /// Position of this category in [`Self::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Message => 0,
            Self::SuperChat => 1,
            Self::Gift => 2,
            Self::GuardPurchase => 3,
        }
    }
}

impl fmt::Display for DanmuCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Chat message specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFields {
    /// Sender name, empty when the source does not publish it.
    pub display_name: String,
    /// User id, or its checksum when the source obfuscates it.
    pub identity_key: String,
    /// Display position (`1` scrolling, `4` bottom, `5` top).
    pub position: String,
    /// RGB colour as a decimal integer string.
    pub colour: String,
    /// Absolute send time in epoch milliseconds.
    pub absolute_millis: i64,
}

impl MessageFields {
    pub fn has_default_colour(&self) -> bool {
        self.colour == DEFAULT_COLOUR
    }

    pub fn has_default_position(&self) -> bool {
        self.position == DEFAULT_POSITION
    }
}

/// Category specific payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordBody {
    Message(MessageFields),
    /// Opaque attributes of a paid event, in source order, without `ts`.
    Attributes(Vec<(String, String)>),
}

/// Context available while parsing a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseContext<'a> {
    /// Start of the owning recording, when already known.
    pub start_time: Option<DateTime<FixedOffset>>,
    /// Identity table used to resolve checksum identities.
    pub resolver: Option<&'a IdentityResolver>,
}

/// A single danmu record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanmuRecord {
    category: DanmuCategory,
    /// Seconds from the owning recording's start (or the merged timeline).
    pub timestamp: f64,
    text: String,
    body: RecordBody,
}

impl DanmuRecord {
    /// Create a chat message record.
    pub fn message(timestamp: f64, text: impl Into<String>, fields: MessageFields) -> Self {
        Self {
            category: DanmuCategory::Message,
            timestamp,
            text: text.into(),
            body: RecordBody::Message(fields),
        }
    }

    /// Create a paid event record. `category` must not be `Message`.
    pub fn paid(
        category: DanmuCategory,
        timestamp: f64,
        text: impl Into<String>,
        attributes: Vec<(String, String)>,
    ) -> Result<Self> {
        if category == DanmuCategory::Message {
            return Err(DanmakuError::malformed_record(
                "chat messages carry message fields, not attributes",
            ));
        }
        Ok(Self {
            category,
            timestamp,
            text: text.into(),
            body: RecordBody::Attributes(attributes),
        })
    }

    pub fn category(&self) -> DanmuCategory {
        self.category
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn body(&self) -> &RecordBody {
        &self.body
    }

    /// Message fields, for chat messages.
    pub fn message_fields(&self) -> Option<&MessageFields> {
        match &self.body {
            RecordBody::Message(fields) => Some(fields),
            RecordBody::Attributes(_) => None,
        }
    }

    /// Attributes, for paid events.
    pub fn attributes(&self) -> Option<&[(String, String)]> {
        match &self.body {
            RecordBody::Message(_) => None,
            RecordBody::Attributes(attrs) => Some(attrs),
        }
    }

    /// Replace the message fields of a chat message. No-op for paid events.
    pub fn set_message_fields(&mut self, fields: MessageFields) {
        if let RecordBody::Message(current) = &mut self.body {
            *current = fields;
        }
    }

    /// Parse a record from its XML element.
    pub fn parse(node: &XmlNode, ctx: &ParseContext<'_>) -> Result<Self> {
        let category = DanmuCategory::from_tag(&node.name).ok_or_else(|| {
            DanmakuError::malformed_record(format!("unknown element <{}>", node.name))
        })?;

        match category {
            DanmuCategory::Message => parse_message(node, ctx),
            _ => parse_paid(category, node),
        }
    }

    /// Render this record back to its XML element.
    pub fn render(&self) -> XmlNode {
        let mut node = XmlNode::new(self.category.tag());
        match &self.body {
            RecordBody::Message(fields) => {
                node.set_attribute(
                    "p",
                    format!(
                        "{:.3},{},{},{},{},0,{},0",
                        self.timestamp,
                        fields.position,
                        FONT_SIZE,
                        fields.colour,
                        fields.absolute_millis,
                        fields.identity_key,
                    ),
                );
                if !fields.display_name.is_empty() {
                    node.set_attribute("user", fields.display_name.clone());
                }
            }
            RecordBody::Attributes(attrs) => {
                node.attributes = attrs.clone();
                node.set_attribute("ts", format_seconds(self.timestamp));
            }
        }
        node.text = self.text.clone();
        node
    }
}

fn parse_message(node: &XmlNode, ctx: &ParseContext<'_>) -> Result<DanmuRecord> {
    let packed = node
        .attribute("p")
        .ok_or_else(|| DanmakuError::malformed_record("<d> without 'p' attribute"))?;
    let params: Vec<&str> = packed.split(',').collect();
    if params.len() < 7 {
        return Err(DanmakuError::malformed_record(format!(
            "'p' has {} fields, expected at least 7: {packed}",
            params.len()
        )));
    }

    let timestamp = parse_seconds(params[0])?;
    let display_name = node.attribute("user").unwrap_or_default();
    let absolute_millis = absolute_millis(params[4], timestamp, display_name, ctx)?;

    let mut fields = MessageFields {
        display_name: display_name.to_string(),
        identity_key: params[6].to_string(),
        position: params[1].to_string(),
        colour: params[3].to_string(),
        absolute_millis,
    };

    if fields.display_name.is_empty()
        && let Some(identity) = ctx.resolver.and_then(|r| r.lookup(&fields.identity_key))
    {
        fields.identity_key = identity.true_id.clone();
        fields.display_name = identity.display_name.clone();
    }

    Ok(DanmuRecord::message(timestamp, node.text.clone(), fields))
}

/// Determine the absolute send time of a chat message.
///
/// A 13 digit stamp from a named sender is already in milliseconds. A 10
/// digit stamp only has second precision, so it is rebuilt from the owning
/// recording's start when possible.
fn absolute_millis(
    stamp: &str,
    timestamp: f64,
    display_name: &str,
    ctx: &ParseContext<'_>,
) -> Result<i64> {
    let digits = stamp.len();
    let parse = || {
        stamp
            .parse::<i64>()
            .map_err(|_| DanmakuError::malformed_timestamp(format!("bad epoch stamp '{stamp}'")))
    };

    if digits == 13 && !display_name.is_empty() {
        return parse();
    }
    if digits == 10 {
        if let Some(start) = ctx.start_time {
            let micros = seconds_to_micros(timestamp)
                .and_then(|offset| start.timestamp_micros().checked_add(offset))
                .ok_or_else(|| {
                    DanmakuError::malformed_timestamp(format!(
                        "relative time {timestamp} is out of range"
                    ))
                })?;
            return Ok(micros.div_euclid(1000));
        }
        let seconds = parse()?;
        let fraction_ms = ((timestamp.rem_euclid(1.0) * 1e6).round() as i64 / 1000).min(999);
        return Ok(seconds * 1000 + fraction_ms);
    }

    Err(DanmakuError::malformed_timestamp(format!(
        "cannot determine absolute time from stamp '{stamp}'"
    )))
}

/// Whole microseconds in `value` seconds, or `None` when they do not fit.
pub(crate) fn seconds_to_micros(value: f64) -> Option<i64> {
    let micros = (value * 1e6).round();
    (micros.abs() < i64::MAX as f64).then_some(micros as i64)
}

fn parse_paid(category: DanmuCategory, node: &XmlNode) -> Result<DanmuRecord> {
    let mut attributes = node.attributes.clone();
    let position = attributes
        .iter()
        .position(|(k, _)| k == "ts")
        .ok_or_else(|| {
            DanmakuError::malformed_record(format!("<{}> without 'ts' attribute", node.name))
        })?;
    let (_, ts) = attributes.remove(position);
    let timestamp = parse_seconds(&ts)?;
    DanmuRecord::paid(category, timestamp, node.text.clone(), attributes)
}

fn parse_seconds(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DanmakuError::malformed_timestamp(format!("bad relative time '{value}'")))
}

/// Shortest decimal form of a seconds value, always with a fraction part.
pub(crate) fn format_seconds(value: f64) -> String {
    let s = value.to_string();
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{s}.0")
    } else {
        s
    }
}

/// Order-insensitive attribute comparison.
pub(crate) fn same_attributes(a: &[(String, String)], b: &[(String, String)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| b.iter().any(|(k, v)| k == key && v == value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(p: &str, user: Option<&str>, text: &str) -> XmlNode {
        let mut node = XmlNode::new("d").with_attribute("p", p).with_text(text);
        if let Some(user) = user {
            node.set_attribute("user", user);
        }
        node
    }

    fn start() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2021, 2, 16, 13, 0, 51)
            .unwrap()
    }

    #[test]
    fn test_category_tags() {
        for category in DanmuCategory::ALL {
            assert_eq!(DanmuCategory::from_tag(category.tag()), Some(category));
            assert_eq!(DanmuCategory::ALL[category.index()], category);
        }
        assert_eq!(DanmuCategory::from_tag("div"), None);
    }

    #[test]
    fn test_parse_named_message_uses_millisecond_stamp() {
        let node = d(
            "12.345,4,25,255,1613451663345,0,12345,0",
            Some("alice"),
            "hello",
        );
        let record = DanmuRecord::parse(&node, &ParseContext::default()).unwrap();

        assert_eq!(record.category(), DanmuCategory::Message);
        assert_eq!(record.timestamp, 12.345);
        assert_eq!(record.text(), "hello");
        let fields = record.message_fields().unwrap();
        assert_eq!(fields.display_name, "alice");
        assert_eq!(fields.identity_key, "12345");
        assert_eq!(fields.position, "4");
        assert_eq!(fields.colour, "255");
        assert_eq!(fields.absolute_millis, 1_613_451_663_345);
    }

    #[test]
    fn test_parse_second_stamp_with_known_start() {
        let node = d("10.5,1,25,16777215,1613451661,0,3610a686,0", None, "hi");
        let ctx = ParseContext {
            start_time: Some(start()),
            resolver: None,
        };
        let record = DanmuRecord::parse(&node, &ctx).unwrap();
        assert_eq!(
            record.message_fields().unwrap().absolute_millis,
            1_613_451_661_500
        );
    }

    #[test]
    fn test_parse_second_stamp_without_start_synthesizes_fraction() {
        let node = d("10.25,1,25,16777215,1613451661,0,3610a686,0", None, "hi");
        let record = DanmuRecord::parse(&node, &ParseContext::default()).unwrap();
        assert_eq!(
            record.message_fields().unwrap().absolute_millis,
            1_613_451_661_250
        );
    }

    #[test]
    fn test_parse_rejects_unknown_stamp_shape() {
        let node = d("1.0,1,25,16777215,16134516,0,1,0", Some("alice"), "x");
        let err = DanmuRecord::parse(&node, &ParseContext::default()).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedTimestamp(_)));

        // 13 digit stamps are only trusted together with a sender name
        let node = d("1.0,1,25,16777215,1613451661000,0,1,0", None, "x");
        let err = DanmuRecord::parse(&node, &ParseContext::default()).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedTimestamp(_)));

        let node = d("abc,1,25,16777215,1613451661000,0,1,0", Some("a"), "x");
        let err = DanmuRecord::parse(&node, &ParseContext::default()).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedTimestamp(_)));
    }

    #[test]
    fn test_parse_rejects_relative_time_out_of_range() {
        let ctx = ParseContext {
            start_time: Some(start()),
            resolver: None,
        };
        for ts in ["1e13", "-1e13", "9.222e12"] {
            let node = d(&format!("{ts},1,25,16777215,1613451661,0,k,0"), None, "x");
            let err = DanmuRecord::parse(&node, &ctx).unwrap_err();
            assert!(matches!(err, DanmakuError::MalformedTimestamp(_)), "{ts}");
        }
    }

    #[test]
    fn test_second_stamp_truncates_below_millisecond() {
        let ctx = ParseContext {
            start_time: Some(start()),
            resolver: None,
        };
        let node = d("10.0009,1,25,16777215,1613451661,0,k,0", None, "x");
        let record = DanmuRecord::parse(&node, &ctx).unwrap();
        assert_eq!(
            record.message_fields().unwrap().absolute_millis,
            1_613_451_661_000
        );
    }

    #[test]
    fn test_seconds_to_micros() {
        assert_eq!(seconds_to_micros(1.5), Some(1_500_000));
        assert_eq!(seconds_to_micros(-0.000_001), Some(-1));
        assert_eq!(seconds_to_micros(1e13), None);
    }

    #[test]
    fn test_parse_rejects_short_parameter_string() {
        let node = d("1.0,1,25", Some("a"), "x");
        let err = DanmuRecord::parse(&node, &ParseContext::default()).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedRecord(_)));
    }

    #[test]
    fn test_parse_resolves_checksum_identity() {
        let mut resolver = IdentityResolver::default();
        resolver.record("3610a686", "hello", "alice");
        let node = d("1.0,1,25,16777215,1613451661,0,3610a686,0", None, "x");
        let ctx = ParseContext {
            start_time: Some(start()),
            resolver: Some(&resolver),
        };
        let record = DanmuRecord::parse(&node, &ctx).unwrap();
        let fields = record.message_fields().unwrap();
        assert_eq!(fields.identity_key, "hello");
        assert_eq!(fields.display_name, "alice");
    }

    #[test]
    fn test_parse_paid_event_strips_ts() {
        let node = XmlNode::new("gift")
            .with_attribute("ts", "3.2")
            .with_attribute("user", "bob")
            .with_attribute("giftname", "rocket");
        let record = DanmuRecord::parse(&node, &ParseContext::default()).unwrap();
        assert_eq!(record.category(), DanmuCategory::Gift);
        assert_eq!(record.timestamp, 3.2);
        assert_eq!(
            record.attributes().unwrap(),
            &[
                ("user".to_string(), "bob".to_string()),
                ("giftname".to_string(), "rocket".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_paid_event_without_ts_fails() {
        let node = XmlNode::new("guard").with_attribute("user", "bob");
        let err = DanmuRecord::parse(&node, &ParseContext::default()).unwrap_err();
        assert!(matches!(err, DanmakuError::MalformedRecord(_)));
    }

    #[test]
    fn test_render_round_trip() {
        let message = d(
            "12.345,4,25,255,1613451663345,0,12345,0",
            Some("alice"),
            "hello",
        );
        let sc = XmlNode::new("sc")
            .with_attribute("user", "bob")
            .with_attribute("price", "30")
            .with_attribute("time", "60")
            .with_attribute("ts", "42.5")
            .with_text("thanks");
        let guard = XmlNode::new("guard")
            .with_attribute("user", "carol")
            .with_attribute("level", "3")
            .with_attribute("count", "1")
            .with_attribute("ts", "7.0");

        for node in [message, sc, guard] {
            let record = DanmuRecord::parse(&node, &ParseContext::default()).unwrap();
            assert_eq!(record.render(), node);
        }
    }

    #[test]
    fn test_render_omits_empty_user_and_text() {
        let node = d("1.5,1,25,16777215,1613451661,0,3610a686,0", None, "");
        let ctx = ParseContext {
            start_time: Some(start()),
            resolver: None,
        };
        let rendered = DanmuRecord::parse(&node, &ctx).unwrap().render();
        assert_eq!(rendered.attribute("user"), None);
        assert_eq!(
            rendered.attribute("p"),
            Some("1.500,1,25,16777215,1613451652500,0,3610a686,0")
        );
        assert!(rendered.text.is_empty());
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(12.0), "12.0");
        assert_eq!(format_seconds(-3.0), "-3.0");
        assert_eq!(format_seconds(3.25), "3.25");
    }

    #[test]
    fn test_same_attributes_ignores_order() {
        let a = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        let b = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        assert!(same_attributes(&a, &b));
        assert!(!same_attributes(&a, &b[..1]));
    }
}
