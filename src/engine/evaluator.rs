//! Condition evaluation: pure, no I/O, no wall clock.

use crate::model::automation::{ConditionError, Conditions, TriggerType};
use crate::model::event::{Event, EventKind};

/// Does `event` satisfy the trigger with these conditions?
///
/// Malformed conditions are an error; a missing rating or sentiment is
/// simply no match.
pub fn evaluate(
    trigger: TriggerType,
    conditions: &Conditions,
    event: &Event,
) -> Result<bool, ConditionError> {
    check_conditions(trigger, conditions)?;
    let snapshot = event.snapshot();

    let matched = match trigger {
        TriggerType::NewReview => event.kind() == EventKind::Created,
        TriggerType::RatingBelow | TriggerType::RatingAbove => {
            let threshold = required_threshold(trigger, conditions)?;
            match snapshot.rating {
                Some(rating) if trigger == TriggerType::RatingBelow => rating < threshold,
                Some(rating) => rating > threshold,
                None => false,
            }
        }
        TriggerType::SentimentNegative => snapshot
            .sentiment
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("negative")),
        TriggerType::KeywordMatch => {
            let body = snapshot.body.to_lowercase();
            conditions
                .keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .any(|k| body.contains(&k.to_lowercase()))
        }
        // Elapsed time is decided by the scanner, never here.
        TriggerType::NoReply24h => event.kind() == EventKind::NoReplyElapsed,
    };

    Ok(matched)
}

/// Validate conditions for a trigger type without an event. Used when rules
/// are loaded so malformed rows are quarantined early.
pub fn check_conditions(
    trigger: TriggerType,
    conditions: &Conditions,
) -> Result<(), ConditionError> {
    if trigger.uses_threshold() {
        required_threshold(trigger, conditions)?;
    }
    Ok(())
}

fn required_threshold(
    trigger: TriggerType,
    conditions: &Conditions,
) -> Result<i32, ConditionError> {
    let threshold = conditions
        .threshold
        .ok_or(ConditionError::MissingThreshold(trigger))?;
    if !(1..=5).contains(&threshold) {
        return Err(ConditionError::ThresholdOutOfRange(threshold));
    }
    Ok(threshold)
}
