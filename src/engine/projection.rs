use crate::model::*;

// ── Available-slots projection ───────────────────────────────────

/// Declared slots minus the slots held by active bookings on the same day.
///
/// Set difference by `(start, end)` value equality; a booking for a slot the
/// trainer no longer declares has nothing to subtract from. Output keeps the
/// declared order.
pub fn available_slots(avail: &Availability, sched: &TrainerSchedule) -> Vec<TimeSlot> {
    let booked: Vec<TimeSlot> = sched
        .active_bookings_on(avail.date)
        .map(|b| b.slot)
        .collect();
    avail
        .slots
        .iter()
        .filter(|slot| !booked.contains(slot))
        .copied()
        .collect()
}
