use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::projection::available_slots;
use super::Engine;

impl Engine {
    pub fn get_user(&self, id: &Ulid) -> Option<UserProfile> {
        self.users.get(id).map(|e| e.value().clone())
    }

    /// Public profiles of every user with the trainer role, by name.
    pub fn list_trainers(&self) -> Vec<PublicProfile> {
        let mut trainers: Vec<PublicProfile> = self
            .users
            .iter()
            .filter(|e| e.value().role == Role::Trainer)
            .map(|e| PublicProfile::from(e.value()))
            .collect();
        trainers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        trainers
    }

    /// The trainer's availability records, date ascending.
    pub async fn list_trainer_availability(&self, trainer_id: Ulid) -> Vec<AvailabilityView> {
        let Some(sched) = self.get_schedule(&trainer_id) else {
            return Vec::new();
        };
        let guard = sched.read().await;
        guard
            .availability
            .values()
            .map(|a| self.availability_view(a))
            .collect()
    }

    /// Every booking made against the trainer, any status, date ascending.
    pub async fn list_trainer_bookings(&self, trainer_id: Ulid) -> Vec<BookingView> {
        let Some(sched) = self.get_schedule(&trainer_id) else {
            return Vec::new();
        };
        let guard = sched.read().await;
        guard.bookings.iter().map(|b| self.booking_view(b)).collect()
    }

    /// Every booking the member has made, any status, date ascending.
    pub async fn list_member_bookings(&self, member_id: Ulid) -> Vec<BookingView> {
        let booking_ids = self
            .index
            .by_member
            .get(&member_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut by_trainer: HashMap<Ulid, Vec<Ulid>> = HashMap::new();
        for id in booking_ids {
            if let Some(trainer_id) = self.index.bookings.get(&id).map(|e| *e.value()) {
                by_trainer.entry(trainer_id).or_default().push(id);
            }
        }

        let mut bookings = Vec::new();
        for (trainer_id, ids) in by_trainer {
            let Some(sched) = self.get_schedule(&trainer_id) else {
                continue;
            };
            let guard = sched.read().await;
            bookings.extend(ids.iter().filter_map(|id| guard.booking(*id)).cloned());
        }
        bookings.sort_by(|a, b| {
            (a.date, a.slot, a.created_at).cmp(&(b.date, b.slot, b.created_at))
        });
        bookings.iter().map(|b| self.booking_view(b)).collect()
    }

    /// Trainers plus open days with their still-bookable slots.
    ///
    /// With `date`, only that exact day is considered. Without it, every day
    /// whose midnight falls within `[now, now + 30 days]`.
    pub async fn browse(&self, date: Option<NaiveDate>, now: Ms) -> BrowseView {
        let window_end = now + BROWSE_WINDOW_DAYS * 24 * 3_600_000;
        let in_window = |d: NaiveDate| match date {
            Some(wanted) => d == wanted,
            None => {
                let t = day_start_ms(d);
                now <= t && t <= window_end
            }
        };

        let bounds = match date {
            Some(wanted) => Some((wanted, wanted)),
            None => date_of(now).zip(date_of(window_end)),
        };

        let mut open_days = Vec::new();
        if let Some((first, last)) = bounds {
            let schedules: Vec<_> = self.schedules.iter().map(|e| e.value().clone()).collect();
            for sched in schedules {
                let guard = sched.read().await;
                let days = guard.availability.range(first..=last).map(|(_, a)| a);
                for avail in days.filter(|a| in_window(a.date)) {
                    open_days.push(OpenDayView {
                        availability: self.availability_view(avail),
                        available_slots: available_slots(avail, &guard),
                    });
                }
            }
        }
        open_days.sort_by(|a, b| {
            (a.availability.date, &a.availability.trainer.name, a.availability.trainer.id).cmp(&(
                b.availability.date,
                &b.availability.trainer.name,
                b.availability.trainer.id,
            ))
        });

        BrowseView {
            trainers: self.list_trainers(),
            availability: open_days,
        }
    }
}
