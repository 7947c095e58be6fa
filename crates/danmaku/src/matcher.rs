//! Duplicate detection between two records.
//!
//! [`resolve`] never mutates its inputs. Field backfills and identity links
//! are returned in the [`MatchOutcome`] and applied by the caller.
//!
//! Two messages whose display names are both empty do not match on name
//! alone. Older versions of the merge tool compared names with plain
//! equality and merged such pairs; they now need an identity or checksum
//! match.

use crate::checksum::identity_checksum;
use crate::record::{DanmuRecord, MessageFields, RecordBody, same_attributes};
use crate::resolver::{IdentityLink, ResolvedIdentity};

/// Result of comparing a reference record with a candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub is_match: bool,
    /// New message fields for the reference record, when they changed.
    pub updated_reference: Option<MessageFields>,
    /// New message fields for the candidate record, when they changed.
    pub updated_candidate: Option<MessageFields>,
    /// Checksum link discovered by this comparison.
    pub resolver_update: Option<IdentityLink>,
}

impl MatchOutcome {
    fn distinct() -> Self {
        Self::default()
    }

    fn duplicate() -> Self {
        Self {
            is_match: true,
            ..Self::default()
        }
    }
}

/// Compare two records that already share a timeline.
pub fn resolve(reference: &DanmuRecord, candidate: &DanmuRecord, tolerance: f64) -> MatchOutcome {
    resolve_shifted(reference, candidate, 0.0, tolerance)
}

/// Compare two records, moving the candidate by `candidate_offset` seconds
/// first.
pub fn resolve_shifted(
    reference: &DanmuRecord,
    candidate: &DanmuRecord,
    candidate_offset: f64,
    tolerance: f64,
) -> MatchOutcome {
    if reference.category() != candidate.category()
        || reference.text() != candidate.text()
        || (reference.timestamp - (candidate.timestamp + candidate_offset)).abs() >= tolerance
    {
        return MatchOutcome::distinct();
    }

    match (reference.body(), candidate.body()) {
        (RecordBody::Message(a), RecordBody::Message(b)) => resolve_messages(a, b),
        (RecordBody::Attributes(a), RecordBody::Attributes(b)) if same_attributes(a, b) => {
            MatchOutcome::duplicate()
        }
        _ => MatchOutcome::distinct(),
    }
}

fn resolve_messages(reference: &MessageFields, candidate: &MessageFields) -> MatchOutcome {
    let same_name = !reference.display_name.is_empty()
        && reference.display_name == candidate.display_name;
    if reference.identity_key == candidate.identity_key || same_name {
        let mut outcome = MatchOutcome::duplicate();
        let mut backfilled = reference.clone();
        if backfilled.has_default_colour() {
            backfilled.colour = candidate.colour.clone();
        }
        if backfilled.has_default_position() {
            backfilled.position = candidate.position.clone();
        }
        if backfilled != *reference {
            outcome.updated_reference = Some(backfilled);
        }
        return outcome;
    }

    // reference comes from a checksum-only source
    if reference.identity_key == identity_checksum(&candidate.identity_key) {
        return MatchOutcome {
            is_match: true,
            updated_reference: Some(candidate.clone()),
            updated_candidate: None,
            resolver_update: Some(link(&reference.identity_key, candidate)),
        };
    }

    // candidate comes from a checksum-only source
    if identity_checksum(&reference.identity_key) == candidate.identity_key {
        let mut resolved = candidate.clone();
        resolved.identity_key = reference.identity_key.clone();
        resolved.display_name = reference.display_name.clone();
        return MatchOutcome {
            is_match: true,
            updated_reference: None,
            updated_candidate: Some(resolved),
            resolver_update: Some(link(&candidate.identity_key, reference)),
        };
    }

    MatchOutcome::distinct()
}

fn link(checksum: &str, plain: &MessageFields) -> IdentityLink {
    IdentityLink {
        checksum: checksum.to_string(),
        identity: ResolvedIdentity {
            true_id: plain.identity_key.clone(),
            display_name: plain.display_name.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DEFAULT_COLOUR, DEFAULT_POSITION, DanmuCategory};
    use rstest::rstest;

    const TOLERANCE: f64 = 120.0;

    fn fields(name: &str, key: &str, colour: &str, position: &str) -> MessageFields {
        MessageFields {
            display_name: name.to_string(),
            identity_key: key.to_string(),
            position: position.to_string(),
            colour: colour.to_string(),
            absolute_millis: 1_613_451_661_000,
        }
    }

    fn message(ts: f64, text: &str, fields: MessageFields) -> DanmuRecord {
        DanmuRecord::message(ts, text, fields)
    }

    fn gift(ts: f64, text: &str, giftname: &str) -> DanmuRecord {
        DanmuRecord::paid(
            DanmuCategory::Gift,
            ts,
            text,
            vec![
                ("user".to_string(), "bob".to_string()),
                ("giftname".to_string(), giftname.to_string()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_same_identity_matches_and_backfills_style() {
        let reference = message(
            10.0,
            "hi",
            fields("", "3610a686", DEFAULT_COLOUR, DEFAULT_POSITION),
        );
        let candidate = message(12.0, "hi", fields("alice", "3610a686", "255", "4"));

        let outcome = resolve(&reference, &candidate, TOLERANCE);
        assert!(outcome.is_match);
        let updated = outcome.updated_reference.unwrap();
        assert_eq!(updated.colour, "255");
        assert_eq!(updated.position, "4");
        // names are not copied by a plain identity match
        assert_eq!(updated.display_name, "");
        assert!(outcome.resolver_update.is_none());
    }

    #[test]
    fn test_same_name_matches_without_update_when_styled() {
        let reference = message(10.0, "hi", fields("alice", "1", "255", "4"));
        let candidate = message(10.0, "hi", fields("alice", "2", "0", "5"));
        let outcome = resolve(&reference, &candidate, TOLERANCE);
        assert!(outcome.is_match);
        assert!(outcome.updated_reference.is_none());
    }

    #[test]
    fn test_empty_names_do_not_match_each_other() {
        let reference = message(10.0, "hi", fields("", "aaaa", "0", "1"));
        let candidate = message(10.0, "hi", fields("", "bbbb", "0", "1"));
        assert!(!resolve(&reference, &candidate, TOLERANCE).is_match);
    }

    #[test]
    fn test_checksum_reference_takes_plain_identity() {
        let reference = message(
            10.0,
            "hi",
            fields("", "3610a686", DEFAULT_COLOUR, DEFAULT_POSITION),
        );
        let plain = fields("alice", "hello", "255", "4");
        let candidate = message(11.0, "hi", plain.clone());

        let outcome = resolve(&reference, &candidate, TOLERANCE);
        assert!(outcome.is_match);
        assert_eq!(outcome.updated_reference, Some(plain));
        let link = outcome.resolver_update.unwrap();
        assert_eq!(link.checksum, "3610a686");
        assert_eq!(link.identity.true_id, "hello");
        assert_eq!(link.identity.display_name, "alice");
    }

    #[test]
    fn test_checksum_candidate_links_without_touching_reference() {
        let reference = message(10.0, "hi", fields("alice", "hello", "255", "4"));
        let candidate = message(
            11.0,
            "hi",
            fields("", "3610a686", DEFAULT_COLOUR, DEFAULT_POSITION),
        );

        let outcome = resolve(&reference, &candidate, TOLERANCE);
        assert!(outcome.is_match);
        assert!(outcome.updated_reference.is_none());
        let resolved = outcome.updated_candidate.unwrap();
        assert_eq!(resolved.identity_key, "hello");
        assert_eq!(resolved.display_name, "alice");
        assert_eq!(outcome.resolver_update.unwrap().checksum, "3610a686");
    }

    #[test]
    fn test_different_identity_is_distinct() {
        let reference = message(10.0, "hi", fields("alice", "1", "0", "1"));
        let candidate = message(10.0, "hi", fields("bob", "2", "0", "1"));
        assert_eq!(
            resolve(&reference, &candidate, TOLERANCE),
            MatchOutcome::default()
        );
    }

    #[test]
    fn test_different_text_is_distinct() {
        let reference = message(10.0, "hi", fields("alice", "1", "0", "1"));
        let candidate = message(10.0, "hello", fields("alice", "1", "0", "1"));
        assert!(!resolve(&reference, &candidate, TOLERANCE).is_match);
    }

    #[rstest]
    #[case(TOLERANCE - 0.001, true)]
    #[case(TOLERANCE, false)]
    #[case(TOLERANCE + 0.001, false)]
    #[case(-(TOLERANCE - 0.001), true)]
    #[case(-(TOLERANCE + 0.001), false)]
    fn test_tolerance_boundary(#[case] delta: f64, #[case] expected: bool) {
        let reference = message(1000.0, "hi", fields("alice", "1", "0", "1"));
        let candidate = message(1000.0 + delta, "hi", fields("alice", "1", "0", "1"));
        assert_eq!(resolve(&reference, &candidate, TOLERANCE).is_match, expected);
    }

    #[test]
    fn test_offset_is_applied_to_candidate() {
        let reference = message(500.0, "hi", fields("alice", "1", "0", "1"));
        let candidate = message(0.0, "hi", fields("alice", "1", "0", "1"));
        assert!(!resolve(&reference, &candidate, TOLERANCE).is_match);
        assert!(resolve_shifted(&reference, &candidate, 450.0, TOLERANCE).is_match);
    }

    #[test]
    fn test_paid_events_need_equal_attributes() {
        assert!(resolve(&gift(1.0, "", "rocket"), &gift(2.0, "", "rocket"), TOLERANCE).is_match);
        assert!(!resolve(&gift(1.0, "", "rocket"), &gift(2.0, "", "heart"), TOLERANCE).is_match);
    }

    #[test]
    fn test_categories_never_match() {
        let attrs = vec![("user".to_string(), "bob".to_string())];
        let sc = DanmuRecord::paid(DanmuCategory::SuperChat, 1.0, "x", attrs.clone()).unwrap();
        let guard = DanmuRecord::paid(DanmuCategory::GuardPurchase, 1.0, "x", attrs).unwrap();
        assert!(!resolve(&sc, &guard, TOLERANCE).is_match);

        let chat = message(1.0, "x", fields("bob", "1", "0", "1"));
        assert!(!resolve(&chat, &sc, TOLERANCE).is_match);
    }
}
