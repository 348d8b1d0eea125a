//! Condition evaluation, trigger compatibility, and fingerprint derivation.

mod common;

use common::{snapshot, snapshot_at};
use review_automation::engine::evaluator::{check_conditions, evaluate};
use review_automation::model::automation::ConditionError;
use review_automation::model::*;

fn created(snapshot: ReviewSnapshot) -> Event {
    Event::new(TenantId::new(), ReviewId::new(), EventKind::Created, snapshot)
}

// ---------------------------------------------------------------------------
// Rating thresholds
// ---------------------------------------------------------------------------

#[test]
fn rating_below_is_strict_and_ignores_unrated() {
    let conditions = Conditions::threshold(3);
    let cases = [
        (Some(1), true),
        (Some(2), true),
        (Some(3), false),
        (Some(4), false),
        (Some(5), false),
        (None, false),
    ];
    for (rating, expected) in cases {
        let event = created(snapshot(rating, "text"));
        assert_eq!(
            evaluate(TriggerType::RatingBelow, &conditions, &event).unwrap(),
            expected,
            "rating {rating:?}"
        );
    }
}

#[test]
fn rating_above_is_strict_and_ignores_unrated() {
    let conditions = Conditions::threshold(3);
    let cases = [
        (Some(1), false),
        (Some(3), false),
        (Some(4), true),
        (Some(5), true),
        (None, false),
    ];
    for (rating, expected) in cases {
        let event = created(snapshot(rating, "text"));
        assert_eq!(
            evaluate(TriggerType::RatingAbove, &conditions, &event).unwrap(),
            expected,
            "rating {rating:?}"
        );
    }
}

#[test]
fn rating_trigger_without_threshold_is_malformed() {
    let event = created(snapshot(Some(1), "text"));
    let err = evaluate(TriggerType::RatingBelow, &Conditions::default(), &event).unwrap_err();
    assert_eq!(err, ConditionError::MissingThreshold(TriggerType::RatingBelow));
}

#[test]
fn threshold_must_be_between_one_and_five() {
    assert_eq!(
        check_conditions(TriggerType::RatingAbove, &Conditions::threshold(0)),
        Err(ConditionError::ThresholdOutOfRange(0))
    );
    assert_eq!(
        check_conditions(TriggerType::RatingAbove, &Conditions::threshold(6)),
        Err(ConditionError::ThresholdOutOfRange(6))
    );
    assert!(check_conditions(TriggerType::RatingAbove, &Conditions::threshold(5)).is_ok());
    // Triggers without thresholds ignore the field.
    assert!(check_conditions(TriggerType::NewReview, &Conditions::default()).is_ok());
}

// ---------------------------------------------------------------------------
// Sentiment and keywords
// ---------------------------------------------------------------------------

#[test]
fn sentiment_negative_matches_case_insensitively() {
    let mut snap = snapshot(Some(2), "meh");
    snap.sentiment = Some("NEGATIVE".to_string());
    let event = created(snap.clone());
    assert!(evaluate(TriggerType::SentimentNegative, &Conditions::default(), &event).unwrap());

    snap.sentiment = Some("neutral".to_string());
    let event = created(snap.clone());
    assert!(!evaluate(TriggerType::SentimentNegative, &Conditions::default(), &event).unwrap());

    snap.sentiment = None;
    let event = created(snap);
    assert!(!evaluate(TriggerType::SentimentNegative, &Conditions::default(), &event).unwrap());
}

#[test]
fn keyword_match_is_case_insensitive_substring() {
    let conditions = Conditions::keywords(["Refund", "rude"]);

    let event = created(snapshot(Some(1), "I want a REFUND now"));
    assert!(evaluate(TriggerType::KeywordMatch, &conditions, &event).unwrap());

    let event = created(snapshot(Some(1), "The staff were RUDE."));
    assert!(evaluate(TriggerType::KeywordMatch, &conditions, &event).unwrap());

    let event = created(snapshot(Some(1), "Lovely place"));
    assert!(!evaluate(TriggerType::KeywordMatch, &conditions, &event).unwrap());
}

#[test]
fn blank_keywords_never_match() {
    let conditions = Conditions::keywords(["", "   "]);
    let event = created(snapshot(Some(1), "anything at all"));
    assert!(!evaluate(TriggerType::KeywordMatch, &conditions, &event).unwrap());
}

// ---------------------------------------------------------------------------
// Trigger / event kind compatibility
// ---------------------------------------------------------------------------

#[test]
fn new_review_only_fires_on_created() {
    let snap = snapshot(Some(5), "great");
    let created = Event::new(TenantId::new(), ReviewId::new(), EventKind::Created, snap.clone());
    let updated = Event::new(TenantId::new(), ReviewId::new(), EventKind::Updated, snap);

    assert!(evaluate(TriggerType::NewReview, &Conditions::default(), &created).unwrap());
    assert!(!evaluate(TriggerType::NewReview, &Conditions::default(), &updated).unwrap());
    assert!(!TriggerType::NewReview.accepts(EventKind::Updated));
}

#[test]
fn no_reply_trigger_only_listens_to_scanner_events() {
    for trigger in TriggerType::ALL {
        let expected = trigger == TriggerType::NoReply24h;
        assert_eq!(trigger.accepts(EventKind::NoReplyElapsed), expected, "{trigger}");
    }
    assert!(!TriggerType::NoReply24h.accepts(EventKind::Created));
    assert!(!TriggerType::NoReply24h.accepts(EventKind::Updated));
}

#[test]
fn trigger_types_round_trip_through_their_names() {
    for trigger in TriggerType::ALL {
        assert_eq!(trigger.as_str().parse::<TriggerType>().unwrap(), trigger);
    }
    assert!("rating_sideways".parse::<TriggerType>().is_err());
}

// ---------------------------------------------------------------------------
// Versions and fingerprints
// ---------------------------------------------------------------------------

#[test]
fn redelivered_event_has_same_fingerprint() {
    let tenant = TenantId::new();
    let review = ReviewId::new();
    let automation = AutomationId::new();
    let snap = snapshot(Some(1), "bad");

    let first = Event::new(tenant, review, EventKind::Created, snap.clone());
    let again = Event::new(tenant, review, EventKind::Created, snap);
    assert_ne!(first.id(), again.id());
    assert_eq!(first.version(), again.version());
    assert_eq!(
        Fingerprint::compute(automation, TriggerType::RatingBelow, &first),
        Fingerprint::compute(automation, TriggerType::RatingBelow, &again)
    );
}

#[test]
fn distinct_updates_have_distinct_fingerprints() {
    let tenant = TenantId::new();
    let review = ReviewId::new();
    let automation = AutomationId::new();
    let created_at = common::hours_ago(1);

    let before = Event::new(
        tenant,
        review,
        EventKind::Updated,
        snapshot_at(Some(4), "fine", created_at),
    );
    let after = Event::new(
        tenant,
        review,
        EventKind::Updated,
        snapshot_at(Some(2), "fine", created_at),
    );
    assert_ne!(before.version(), after.version());
    assert_ne!(
        Fingerprint::compute(automation, TriggerType::RatingBelow, &before),
        Fingerprint::compute(automation, TriggerType::RatingBelow, &after)
    );
}

#[test]
fn no_reply_fingerprint_ignores_scan_slot() {
    let tenant = TenantId::new();
    let review = ReviewId::new();
    let automation = AutomationId::new();
    let snap = snapshot_at(Some(3), "hello?", common::hours_ago(30));

    let first = Event::no_reply_elapsed(tenant, review, snap.clone(), common::hours_ago(1));
    let later = Event::no_reply_elapsed(tenant, review, snap, chrono::Utc::now());
    assert_ne!(first.version(), later.version());
    assert_eq!(
        Fingerprint::compute(automation, TriggerType::NoReply24h, &first),
        Fingerprint::compute(automation, TriggerType::NoReply24h, &later)
    );
}

#[test]
fn fingerprint_differs_per_automation() {
    let event = created(snapshot(Some(1), "x"));
    assert_ne!(
        Fingerprint::compute(AutomationId::new(), TriggerType::RatingBelow, &event),
        Fingerprint::compute(AutomationId::new(), TriggerType::RatingBelow, &event)
    );
}
