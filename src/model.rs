use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Midnight (UTC) of `date` as unix milliseconds.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar day (UTC) containing the instant `t`.
pub fn date_of(t: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(t).map(|dt| dt.date_naive())
}

/// Parse a calendar date. Accepts `YYYY-MM-DD` or an RFC 3339 timestamp,
/// whose time of day is dropped (UTC).
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.naive_utc().date())
}

// ── Time slots ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("invalid time format {0:?} (expected HH:MM)")]
    Malformed(String),
    #[error("slot {start}-{end} must start before it ends")]
    Empty { start: String, end: String },
}

/// Half-open time-of-day interval `[start, end)`, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawSlot", into = "RawSlot")]
pub struct TimeSlot {
    start: u16,
    end: u16,
}

impl TimeSlot {
    pub fn new(start: u16, end: u16) -> Result<Self, SlotError> {
        if start >= MINUTES_PER_DAY || end >= MINUTES_PER_DAY {
            return Err(SlotError::Malformed(format_minute(start.max(end))));
        }
        if start >= end {
            return Err(SlotError::Empty {
                start: format_minute(start),
                end: format_minute(end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, SlotError> {
        Self::new(parse_minute(start)?, parse_minute(end)?)
    }

    pub fn start_minute(&self) -> u16 {
        self.start
    }

    pub fn end_minute(&self) -> u16 {
        self.end
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Instant at which this slot ends on `date`.
    pub fn end_ms(&self, date: NaiveDate) -> Ms {
        day_start_ms(date) + Ms::from(self.end) * MS_PER_MINUTE
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

/// `H:MM` or `HH:MM`, 24-hour clock.
fn parse_minute(s: &str) -> Result<u16, SlotError> {
    let malformed = || SlotError::Malformed(s.to_string());
    let (h, m) = s.split_once(':').ok_or_else(malformed)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(malformed());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hours: u16 = h.parse().map_err(|_| malformed())?;
    let minutes: u16 = m.parse().map_err(|_| malformed())?;
    if hours > 23 || minutes > 59 {
        return Err(malformed());
    }
    Ok(hours * 60 + minutes)
}

fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Wire shape of a slot: `{"start": "HH:MM", "end": "HH:MM"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSlot {
    pub start: String,
    pub end: String,
}

impl TryFrom<RawSlot> for TimeSlot {
    type Error = SlotError;

    fn try_from(raw: RawSlot) -> Result<Self, Self::Error> {
        TimeSlot::parse(&raw.start, &raw.end)
    }
}

impl From<TimeSlot> for RawSlot {
    fn from(slot: TimeSlot) -> Self {
        Self {
            start: format_minute(slot.start),
            end: format_minute(slot.end),
        }
    }
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Trainer,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Trainer => "trainer",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "trainer" => Ok(Role::Trainer),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A user as known to the directory. Owned by the authentication side;
/// the scheduler only reads it for role checks and profile embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

/// Public projection of a user embedded in responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub profile_pic: Option<String>,
}

impl PublicProfile {
    /// Stand-in for an id the directory does not know.
    pub fn unknown(id: Ulid) -> Self {
        Self {
            id,
            name: String::new(),
            email: String::new(),
            profile_pic: None,
        }
    }
}

impl From<&UserProfile> for PublicProfile {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            profile_pic: user.profile_pic.clone(),
        }
    }
}

// ── Availability & bookings ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Booked,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// `booked → cancelled | completed`; both targets are terminal.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Booked, BookingStatus::Cancelled)
                | (BookingStatus::Booked, BookingStatus::Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slots a trainer has opened for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub id: Ulid,
    pub trainer_id: Ulid,
    pub date: NaiveDate,
    /// Sorted by start, pairwise disjoint.
    pub slots: Vec<TimeSlot>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub member_id: Ulid,
    pub trainer_id: Ulid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Booked
    }

    fn sort_key(&self) -> (NaiveDate, TimeSlot) {
        (self.date, self.slot)
    }
}

/// Everything scheduled against one trainer. One lock guards the whole value,
/// so availability edits and bookings for a trainer are serialized.
#[derive(Debug, Clone)]
pub struct TrainerSchedule {
    pub trainer_id: Ulid,
    pub availability: BTreeMap<NaiveDate, Availability>,
    /// All bookings ever made (any status), sorted by `(date, slot)`.
    pub bookings: Vec<Booking>,
}

impl TrainerSchedule {
    pub fn new(trainer_id: Ulid) -> Self {
        Self {
            trainer_id,
            availability: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by `(date, slot)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = booking.sort_key();
        let pos = self.bookings.partition_point(|b| b.sort_key() <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on `date`, any status. Binary search bounds the scan.
    pub fn bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        self.bookings[lo..hi].iter()
    }

    pub fn active_bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings_on(date).filter(|b| b.is_active())
    }

    /// The active booking holding `slot` on `date`, if any.
    pub fn active_booking_for(&self, date: NaiveDate, slot: &TimeSlot) -> Option<&Booking> {
        self.active_bookings_on(date).find(|b| b.slot == *slot)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserUpserted {
        profile: UserProfile,
    },
    AvailabilityCreated {
        id: Ulid,
        trainer_id: Ulid,
        date: NaiveDate,
        slots: Vec<TimeSlot>,
        at: Ms,
    },
    AvailabilityUpdated {
        id: Ulid,
        trainer_id: Ulid,
        date: NaiveDate,
        slots: Vec<TimeSlot>,
        at: Ms,
    },
    AvailabilityDeleted {
        id: Ulid,
        trainer_id: Ulid,
        date: NaiveDate,
    },
    SessionBooked {
        id: Ulid,
        member_id: Ulid,
        trainer_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        trainer_id: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        trainer_id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub id: Ulid,
    pub trainer: PublicProfile,
    pub date: NaiveDate,
    pub slots: Vec<TimeSlot>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// An availability record plus the slots still open for booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDayView {
    #[serde(flatten)]
    pub availability: AvailabilityView,
    pub available_slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub member: PublicProfile,
    pub trainer: PublicProfile,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseView {
    pub trainers: Vec<PublicProfile>,
    pub availability: Vec<OpenDayView>,
}
