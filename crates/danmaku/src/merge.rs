//! Merging of several recordings of the same broadcast.
//!
//! Recordings are processed in the order given. The first one anchors the
//! shared timeline; every other recording is moved by the difference between
//! its start and the anchor. Each recording in turn acts as the reference:
//! its records are kept, and matching records of *later* recordings are
//! dropped as duplicates.
//!
//! Independent clients drift apart by a few seconds even after start-time
//! alignment. The mean offset of the duplicates found between a reference
//! and the recording right after it is applied to that next recording when
//! it becomes the reference.
//!
//! Every category list must be sorted by timestamp; [`SessionLog`] enforces
//! this, which lets the candidate scan stop at the end of the window.

use chrono::{DateTime, FixedOffset, TimeDelta};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MergeConfig;
use crate::error::{DanmakuError, Result};
use crate::matcher::resolve_shifted;
use crate::record::{DanmuCategory, DanmuRecord};
use crate::resolver::IdentityResolver;
use crate::session::SessionLog;

/// Receives merge progress. Counts are monotonically increasing and reach
/// the announced total once the merge completes.
pub trait MergeProgress {
    /// Called once with the number of records across all recordings.
    fn start(&self, _total: u64) {}

    /// `delta` more records were handled (kept or dropped).
    fn advance(&self, delta: u64);

    fn finish(&self) {}
}

/// Progress sink that ignores everything.
impl MergeProgress for () {
    fn advance(&self, _delta: u64) {}
}

/// Counters collected while merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeStats {
    pub sessions: usize,
    pub input_records: usize,
    pub retained_records: usize,
    pub duplicates: usize,
    /// Checksum links written to the identity table.
    pub identities_linked: usize,
    /// Drift correction applied to each reference recording, in seconds.
    pub drift_per_pass: Vec<f64>,
}

/// The merged, time-ordered result.
#[derive(Debug, Clone)]
pub struct MergedLog {
    pub room_id: String,
    pub streamer_name: String,
    /// Start of the earliest recording; record timestamps are relative to it.
    pub start_time: DateTime<FixedOffset>,
    pub records: Vec<DanmuRecord>,
}

/// Everything a merge produces.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub log: MergedLog,
    /// The identity table, including links discovered by this merge.
    pub resolver: IdentityResolver,
    pub stats: MergeStats,
}

/// Pairwise de-duplicating merge of recordings.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    tolerance: f64,
    update_identities: bool,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl MergeEngine {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            tolerance: config.tolerance_secs,
            update_identities: config.identity_table.update,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Merge `sessions` in the given order.
    pub fn merge(
        &self,
        sessions: Vec<SessionLog>,
        mut resolver: IdentityResolver,
        progress: &dyn MergeProgress,
    ) -> Result<MergeOutput> {
        let anchor = sessions.first().ok_or(DanmakuError::EmptyInput)?.start_time;
        let room_id = consistent_value(&sessions, "room id", |s| &s.room_id)?;
        let streamer_name = consistent_value(&sessions, "streamer name", |s| &s.streamer_name)?;
        let earliest = sessions
            .iter()
            .map(|s| s.start_time)
            .min()
            .unwrap_or(anchor);
        let offsets: Vec<f64> = sessions
            .iter()
            .map(|s| seconds(s.start_time - anchor))
            .collect();

        let total: usize = sessions.iter().map(SessionLog::len).sum();
        let mut stats = MergeStats {
            sessions: sessions.len(),
            input_records: total,
            ..Default::default()
        };
        progress.start(total as u64);
        info!(
            "Merging {} records from {} recordings",
            total,
            sessions.len()
        );

        // Consumed duplicates leave a hole so indices stay stable.
        let mut pending: Vec<[Vec<Option<DanmuRecord>>; 4]> = sessions
            .into_iter()
            .map(|s| s.into_events().map(|list| list.into_iter().map(Some).collect()))
            .collect();

        let mut retained = Vec::with_capacity(total);
        let mut drift = 0.0;

        for r in 0..pending.len() {
            let (head, later) = pending.split_at_mut(r + 1);
            let reference = &mut head[r];
            let shift = offsets[r] + drift;
            stats.drift_per_pass.push(drift);
            debug!(
                "Pass {}: offset {:.3}s, drift correction {:.3}s",
                r, offsets[r], drift
            );

            let mut delta_sum = 0.0;
            let mut delta_count = 0usize;

            for category in DanmuCategory::ALL {
                // First index per later recording that can still fall inside
                // the window of the current reference record.
                let mut cursors = vec![0usize; later.len()];

                for slot in reference[category.index()].iter_mut() {
                    let Some(mut record) = slot.take() else {
                        continue;
                    };
                    record.timestamp += shift;
                    progress.advance(1);

                    for (k, other) in later.iter_mut().enumerate() {
                        let o = r + 1 + k;
                        let offset = offsets[o];
                        let candidates = &mut other[category.index()];
                        let cursor = &mut cursors[k];

                        while *cursor < candidates.len()
                            && candidates[*cursor].as_ref().is_none_or(|c| {
                                record.timestamp - (c.timestamp + offset) >= self.tolerance
                            })
                        {
                            *cursor += 1;
                        }

                        for idx in *cursor..candidates.len() {
                            let Some(candidate) = candidates[idx].as_ref() else {
                                continue;
                            };
                            let shifted = candidate.timestamp + offset;
                            if shifted - record.timestamp > self.tolerance {
                                break;
                            }

                            let outcome =
                                resolve_shifted(&record, candidate, offset, self.tolerance);
                            if !outcome.is_match {
                                continue;
                            }

                            candidates[idx] = None;
                            progress.advance(1);
                            stats.duplicates += 1;
                            if let Some(fields) = outcome.updated_reference {
                                record.set_message_fields(fields);
                            }
                            if let Some(link) = outcome.resolver_update {
                                if self.update_identities {
                                    stats.identities_linked += 1;
                                    debug!(
                                        "Linked checksum {} to {} ({})",
                                        link.checksum,
                                        link.identity.true_id,
                                        link.identity.display_name
                                    );
                                    resolver.apply(link);
                                }
                            }
                            if o == r + 1 {
                                delta_sum += shifted - record.timestamp;
                                delta_count += 1;
                            }
                            break;
                        }
                    }

                    retained.push(record);
                }
            }

            drift = if delta_count > 0 {
                delta_sum / delta_count as f64
            } else {
                0.0
            };
        }

        retained.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let rebase = seconds(anchor - earliest);
        if rebase != 0.0 {
            for record in &mut retained {
                record.timestamp += rebase;
            }
        }

        stats.retained_records = retained.len();
        progress.finish();
        info!(
            "Kept {} records, dropped {} duplicates, linked {} identities",
            stats.retained_records, stats.duplicates, stats.identities_linked
        );

        Ok(MergeOutput {
            log: MergedLog {
                room_id,
                streamer_name,
                start_time: earliest,
                records: retained,
            },
            resolver,
            stats,
        })
    }
}

/// The shared non-empty value of a metadata field, or an empty string.
fn consistent_value<'a>(
    sessions: &'a [SessionLog],
    field: &'static str,
    get: impl Fn(&'a SessionLog) -> &'a String,
) -> Result<String> {
    let mut values = sessions.iter().map(get).filter(|v| !v.is_empty());
    let Some(first) = values.next() else {
        return Ok(String::new());
    };
    match values.find(|v| *v != first) {
        Some(other) => Err(DanmakuError::inconsistent(field, first, other)),
        None => Ok(first.clone()),
    }
}

fn seconds(delta: TimeDelta) -> f64 {
    delta
        .num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 / 1e3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MessageFields;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn at(secs: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .timestamp_opt(1_613_451_651 + secs, 0)
            .unwrap()
    }

    fn chat(ts: f64, text: &str, name: &str, key: &str) -> DanmuRecord {
        DanmuRecord::message(
            ts,
            text,
            MessageFields {
                display_name: name.to_string(),
                identity_key: key.to_string(),
                position: "1".to_string(),
                colour: "16777215".to_string(),
                absolute_millis: 0,
            },
        )
    }

    fn session(start: i64, room: &str, records: Vec<DanmuRecord>) -> SessionLog {
        SessionLog::from_records("test.xml", room, "", at(start), records)
    }

    fn texts(log: &MergedLog) -> Vec<&str> {
        log.records.iter().map(|r| r.text()).collect()
    }

    #[derive(Default)]
    struct Counter {
        total: Cell<u64>,
        done: Cell<u64>,
    }

    impl MergeProgress for Counter {
        fn start(&self, total: u64) {
            self.total.set(total);
        }

        fn advance(&self, delta: u64) {
            self.done.set(self.done.get() + delta);
        }
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = MergeEngine::default()
            .merge(vec![], IdentityResolver::default(), &())
            .unwrap_err();
        assert!(matches!(err, DanmakuError::EmptyInput));
    }

    #[test]
    fn test_single_session_is_unchanged() {
        let a = session(
            0,
            "1",
            vec![chat(2.0, "b", "x", "1"), chat(1.0, "a", "x", "1")],
        );
        let output = MergeEngine::default()
            .merge(vec![a], IdentityResolver::default(), &())
            .unwrap();
        assert_eq!(texts(&output.log), vec!["a", "b"]);
        assert_eq!(output.stats.duplicates, 0);
        assert_eq!(output.log.room_id, "1");
    }

    #[test]
    fn test_overlapping_sessions_drop_duplicates() {
        let a = session(
            0,
            "1",
            vec![chat(10.0, "hello", "alice", "1"), chat(20.0, "only a", "bob", "2")],
        );
        // starts 5s later, so 5.0 here is 10.0 on the shared timeline
        let b = session(
            5,
            "",
            vec![chat(5.0, "hello", "alice", "1"), chat(30.0, "only b", "carol", "3")],
        );
        let counter = Counter::default();
        let output = MergeEngine::default()
            .merge(vec![a, b], IdentityResolver::default(), &counter)
            .unwrap();

        assert_eq!(texts(&output.log), vec!["hello", "only a", "only b"]);
        assert_eq!(output.log.records[2].timestamp, 35.0);
        assert_eq!(output.stats.duplicates, 1);
        assert_eq!(counter.total.get(), 4);
        assert_eq!(counter.done.get(), 4);
    }

    #[test]
    fn test_drift_from_previous_pass_is_applied() {
        let a = session(0, "", vec![chat(10.0, "x", "alice", "1")]);
        // b runs 2s late relative to a
        let b = session(
            0,
            "",
            vec![chat(12.0, "x", "alice", "1"), chat(50.0, "y", "bob", "2")],
        );
        let output = MergeEngine::default()
            .merge(vec![a, b], IdentityResolver::default(), &())
            .unwrap();

        assert_eq!(output.stats.drift_per_pass, vec![0.0, 2.0]);
        let y = output.log.records.iter().find(|r| r.text() == "y").unwrap();
        assert_eq!(y.timestamp, 52.0);
    }

    #[test]
    fn test_match_against_non_adjacent_session_does_not_count_for_drift() {
        let a = session(0, "", vec![chat(10.0, "x", "alice", "1")]);
        let b = session(0, "", vec![chat(100.0, "other", "bob", "2")]);
        let c = session(0, "", vec![chat(13.0, "x", "alice", "1")]);
        let output = MergeEngine::default()
            .merge(vec![a, b, c], IdentityResolver::default(), &())
            .unwrap();

        assert_eq!(output.stats.duplicates, 1);
        assert_eq!(output.stats.drift_per_pass, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_identity_links_are_recorded() {
        let a = session(0, "", vec![chat(10.0, "hi", "", "3610a686")]);
        let b = session(0, "", vec![chat(11.0, "hi", "alice", "hello")]);
        let output = MergeEngine::default()
            .merge(vec![a, b], IdentityResolver::default(), &())
            .unwrap();

        assert_eq!(output.log.records.len(), 1);
        let fields = output.log.records[0].message_fields().unwrap();
        assert_eq!(fields.identity_key, "hello");
        assert_eq!(fields.display_name, "alice");
        assert_eq!(output.stats.identities_linked, 1);
        assert_eq!(
            output.resolver.lookup("3610a686").unwrap().true_id,
            "hello"
        );
    }

    #[test]
    fn test_identity_links_not_recorded_when_updates_disabled() {
        let a = session(0, "", vec![chat(10.0, "hi", "", "3610a686")]);
        let b = session(0, "", vec![chat(11.0, "hi", "alice", "hello")]);
        let mut config = MergeConfig::default();
        config.identity_table.update = false;
        let output = MergeEngine::new(&config)
            .merge(vec![a, b], IdentityResolver::default(), &())
            .unwrap();

        assert_eq!(output.log.records.len(), 1);
        assert!(output.resolver.is_empty());
        assert_eq!(output.stats.identities_linked, 0);
    }

    #[test]
    fn test_inconsistent_room_is_rejected() {
        let a = session(0, "1", vec![]);
        let b = session(0, "", vec![]);
        let c = session(0, "2", vec![]);
        let err = MergeEngine::default()
            .merge(vec![a, b, c], IdentityResolver::default(), &())
            .unwrap_err();
        assert!(matches!(
            err,
            DanmakuError::InconsistentSessionMetadata { field: "room id", .. }
        ));
    }

    #[test]
    fn test_non_chronological_order_is_rebased_on_earliest() {
        let late = session(100, "", vec![chat(1.0, "late", "a", "1")]);
        let early = session(0, "", vec![chat(1.0, "early", "b", "2")]);
        let output = MergeEngine::default()
            .merge(vec![late, early], IdentityResolver::default(), &())
            .unwrap();

        assert_eq!(output.log.start_time, at(0));
        assert_eq!(texts(&output.log), vec!["early", "late"]);
        assert_eq!(output.log.records[0].timestamp, 1.0);
        assert_eq!(output.log.records[1].timestamp, 101.0);
    }

    #[test]
    fn test_earlier_candidates_outside_window_are_skipped() {
        let a = session(
            0,
            "",
            vec![chat(500.0, "x", "alice", "1"), chat(900.0, "x", "alice", "1")],
        );
        let b = session(
            0,
            "",
            vec![chat(100.0, "x", "alice", "1"), chat(901.0, "x", "alice", "1")],
        );
        let output = MergeEngine::default()
            .merge(vec![a, b], IdentityResolver::default(), &())
            .unwrap();

        let stamps: Vec<f64> = output.log.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(output.stats.duplicates, 1);
        assert_eq!(stamps.len(), 3);
        assert_eq!(stamps[0], 100.0 + output.stats.drift_per_pass[1]);
    }
}
