use crate::model::Ms;

/// Max slots a trainer may declare for one day.
pub const MAX_SLOTS_PER_DAY: usize = 48;

/// Max length of a user display name.
pub const MAX_NAME_LEN: usize = 50;

/// Max length of an e-mail address.
pub const MAX_EMAIL_LEN: usize = 254;

/// Max length of a profile picture reference.
pub const MAX_PROFILE_PIC_LEN: usize = 2048;

/// Minimum gap between now and the booking date's midnight for a member to cancel.
pub const CANCELLATION_LEAD_MS: Ms = 24 * 3_600_000;

/// Forward window used when browsing trainers without an explicit date.
pub const BROWSE_WINDOW_DAYS: i64 = 30;
