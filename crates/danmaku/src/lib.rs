//! Danmaku: merging of live chat (danmu/弾幕) recordings.
//!
//! Several clients recording the same broadcast each produce an XML log
//! with slightly different coverage, clocks and identity formats. This crate
//! parses those logs, aligns them on one timeline, drops duplicated records
//! and writes a single time-ordered log.
//!
//! ## Core Types
//!
//! - [`DanmuRecord`] - A single chat message, super chat, gift or guard purchase
//! - [`DanmuCategory`] - Record category; records of different categories never match
//! - [`SessionLog`] - One parsed recording, anchored to absolute time
//! - [`IdentityResolver`] - Persisted checksum → user identity table
//!
//! ## Merging
//!
//! - [`MergeEngine`] - Pairwise de-duplication with clock drift correction
//! - [`resolve`] - The duplicate predicate, returning a [`MatchOutcome`]
//! - [`MergeConfig`] - Tolerance window, time zone and file name patterns
//!
//! ## Output
//!
//! - [`XmlDanmuWriter`] - Write merged records to BililiveRecorder-style XML

pub mod checksum;
pub mod config;
pub mod error;
pub mod matcher;
pub mod merge;
pub mod node;
pub mod record;
pub mod resolver;
pub mod session;
pub mod writer;

pub use checksum::identity_checksum;
pub use config::{IdentityTableConfig, MergeConfig, SessionOptions, TimeZoneSetting};
pub use error::{DanmakuError, Result};
pub use matcher::{MatchOutcome, resolve, resolve_shifted};
pub use merge::{MergeEngine, MergeOutput, MergeProgress, MergeStats, MergedLog};
pub use node::{XmlDocument, XmlNode, escape_xml};
pub use record::{DanmuCategory, DanmuRecord, MessageFields, ParseContext, RecordBody};
pub use resolver::{IdentityLink, IdentityResolver, ResolvedIdentity};
pub use session::SessionLog;
pub use writer::{XmlDanmuWriter, render_merged, write_merged, write_merged_file};
