use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// First confirmed reservation of `resource_id` on `date` whose interval overlaps
/// `candidate`. Compares raw intervals, never slot indices.
pub fn find_conflict<'a>(
    resource_id: ResourceId,
    date: NaiveDate,
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Option<&'a Reservation> {
    existing.into_iter().find(|r| {
        r.resource_id == resource_id
            && r.date == date
            && r.is_confirmed()
            && r.span.overlaps(candidate)
    })
}

pub fn has_conflict<'a>(
    resource_id: ResourceId,
    date: NaiveDate,
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> bool {
    find_conflict(resource_id, date, candidate, existing).is_some()
}

pub fn check_no_conflict<'a>(
    resource_id: ResourceId,
    date: NaiveDate,
    candidate: &Span,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Result<(), EngineError> {
    match find_conflict(resource_id, date, candidate, existing) {
        Some(r) => Err(EngineError::Conflict(r.id)),
        None => Ok(()),
    }
}

/// Field checks for a reservation request. Does not look at other reservations.
pub fn validate_request(new: &NewReservation) -> Result<(), EngineError> {
    if new.span.start >= new.span.end {
        return Err(EngineError::InvalidSpan);
    }
    if new.topic.trim().is_empty() {
        return Err(EngineError::LimitExceeded("topic is empty"));
    }
    if char_len(&new.topic) > MAX_TOPIC_LEN {
        return Err(EngineError::LimitExceeded("topic too long"));
    }
    if new.participants.len() > MAX_PARTICIPANTS {
        return Err(EngineError::LimitExceeded("too many participants"));
    }
    if new
        .participants
        .iter()
        .any(|p| char_len(p) > MAX_PARTICIPANT_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("participant name too long"));
    }
    Ok(())
}
