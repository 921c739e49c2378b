use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Sort a declared slot set and reject it unless it is non-empty, within
/// limits, and pairwise disjoint.
pub(crate) fn validate_slot_set(mut slots: Vec<TimeSlot>) -> Result<Vec<TimeSlot>, EngineError> {
    if slots.is_empty() {
        return Err(EngineError::InvalidInput(
            "At least one time slot is required".into(),
        ));
    }
    if slots.len() > MAX_SLOTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many slots for one day"));
    }
    for i in 0..slots.len() {
        for j in (i + 1)..slots.len() {
            if slots[i].overlaps(&slots[j]) {
                return Err(EngineError::OverlappingSlots(slots[i], slots[j]));
            }
        }
    }
    slots.sort();
    Ok(slots)
}

/// A date is in the past once its midnight (UTC) is strictly before `now`.
pub(crate) fn check_not_past(date: NaiveDate, now: Ms, message: &'static str) -> Result<(), EngineError> {
    if day_start_ms(date) < now {
        return Err(EngineError::PastDate(message));
    }
    Ok(())
}

/// Cancellation lead time is measured to midnight of the booking date, not to
/// the slot's start.
pub(crate) fn check_lead_time(date: NaiveDate, now: Ms) -> Result<(), EngineError> {
    if day_start_ms(date) - now < CANCELLATION_LEAD_MS {
        return Err(EngineError::TooLate);
    }
    Ok(())
}

/// Active bookings whose slot would disappear if the day's slots became `new_slots`.
pub(crate) fn orphaned_slots(
    sched: &TrainerSchedule,
    date: NaiveDate,
    new_slots: &[TimeSlot],
) -> Vec<TimeSlot> {
    sched
        .active_bookings_on(date)
        .map(|b| b.slot)
        .filter(|slot| !new_slots.contains(slot))
        .collect()
}
