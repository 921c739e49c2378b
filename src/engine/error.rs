use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, SlotError, TimeSlot};

/// Broad failure classes. Transports map these onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    InvalidState,
    TooLate,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    InvalidSlot(#[from] SlotError),
    #[error("slots {0} and {1} overlap")]
    OverlappingSlots(TimeSlot, TimeSlot),
    #[error("{0}")]
    PastDate(&'static str),
    #[error("Trainer not found")]
    TrainerNotFound(Ulid),
    #[error("Availability not found")]
    AvailabilityNotFound(Ulid),
    #[error("No availability found for this trainer on the selected date")]
    NoAvailability { trainer_id: Ulid, date: NaiveDate },
    #[error("Booking not found")]
    BookingNotFound(Ulid),
    #[error("Selected time slot is not available")]
    SlotNotOffered(TimeSlot),
    #[error("Availability already exists for this date")]
    AvailabilityExists(NaiveDate),
    #[error("This time slot is already booked")]
    SlotAlreadyBooked(TimeSlot),
    #[error("You have already booked this slot")]
    DuplicateBooking(TimeSlot),
    #[error("Cannot remove slots that have existing bookings")]
    SlotsInUse(Vec<TimeSlot>),
    #[error("Cannot delete availability with existing bookings")]
    HasActiveBookings(NaiveDate),
    #[error("Only active bookings can be cancelled (status is {0})")]
    NotActive(BookingStatus),
    #[error("Bookings can only be cancelled at least 24 hours in advance")]
    TooLate,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::InvalidSlot(_)
            | EngineError::OverlappingSlots(..)
            | EngineError::PastDate(_)
            | EngineError::SlotNotOffered(_)
            | EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::TrainerNotFound(_)
            | EngineError::AvailabilityNotFound(_)
            | EngineError::NoAvailability { .. }
            | EngineError::BookingNotFound(_) => ErrorKind::NotFound,
            EngineError::AvailabilityExists(_)
            | EngineError::SlotAlreadyBooked(_)
            | EngineError::DuplicateBooking(_)
            | EngineError::SlotsInUse(_)
            | EngineError::HasActiveBookings(_) => ErrorKind::Conflict,
            EngineError::NotActive(_) => ErrorKind::InvalidState,
            EngineError::TooLate => ErrorKind::TooLate,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let slot = TimeSlot::parse("09:00", "10:00").unwrap();
        assert_eq!(EngineError::PastDate("past").kind(), ErrorKind::InvalidInput);
        assert_eq!(EngineError::SlotNotOffered(slot).kind(), ErrorKind::InvalidInput);
        assert_eq!(EngineError::TrainerNotFound(Ulid::new()).kind(), ErrorKind::NotFound);
        assert_eq!(EngineError::DuplicateBooking(slot).kind(), ErrorKind::Conflict);
        assert_eq!(EngineError::NotActive(BookingStatus::Cancelled).kind(), ErrorKind::InvalidState);
        assert_eq!(EngineError::TooLate.kind(), ErrorKind::TooLate);
        assert_eq!(EngineError::WalError("disk".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn messages_are_user_facing() {
        let e = EngineError::PastDate("Cannot book sessions for past dates");
        assert_eq!(e.to_string(), "Cannot book sessions for past dates");
        let slot = TimeSlot::parse("09:00", "10:00").unwrap();
        let other = TimeSlot::parse("09:30", "10:30").unwrap();
        assert_eq!(
            EngineError::OverlappingSlots(slot, other).to_string(),
            "slots 09:00-10:00 and 09:30-10:30 overlap"
        );
    }
}
