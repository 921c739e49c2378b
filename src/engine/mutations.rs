use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::checks::{check_lead_time, check_not_past, orphaned_slots, validate_slot_set};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Directory ────────────────────────────────────────────

    /// Insert or replace a user profile.
    pub async fn upsert_user(&self, mut profile: UserProfile) -> Result<PublicProfile, EngineError> {
        profile.name = profile.name.trim().to_string();
        profile.email = profile.email.trim().to_lowercase();
        if profile.name.chars().count() < 2 {
            return Err(EngineError::InvalidInput(
                "Name must be at least 2 characters".into(),
            ));
        }
        if profile.name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if profile.email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !is_plausible_email(&profile.email) {
            return Err(EngineError::InvalidInput("Please provide a valid email".into()));
        }
        if let Some(pic) = &profile.profile_pic
            && pic.len() > MAX_PROFILE_PIC_LEN
        {
            return Err(EngineError::LimitExceeded("profile picture reference too long"));
        }
        profile.profile_pic = profile.profile_pic.filter(|p| !p.is_empty());

        let _gate = self.gate.read().await;
        let public = PublicProfile::from(&profile);
        let (id, role) = (profile.id, profile.role);
        self.persist_user(profile).await?;
        info!(user_id = %id, %role, "user upserted");
        Ok(public)
    }

    // ── Availability ledger ──────────────────────────────────

    pub async fn create_availability(
        &self,
        trainer_id: Ulid,
        date: NaiveDate,
        slots: Vec<TimeSlot>,
        now: Ms,
    ) -> Result<AvailabilityView, EngineError> {
        check_not_past(date, now, "Cannot create availability for past dates")?;
        let slots = validate_slot_set(slots)?;

        let _gate = self.gate.read().await;
        let sched = self.schedule_for(trainer_id);
        let mut guard = sched.write().await;
        if guard.availability.contains_key(&date) {
            return Err(EngineError::AvailabilityExists(date));
        }

        let id = Ulid::new();
        let event = Event::AvailabilityCreated { id, trainer_id, date, slots, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%trainer_id, availability_id = %id, %date, "availability created");

        let avail = guard
            .availability
            .get(&date)
            .ok_or(EngineError::AvailabilityNotFound(id))?;
        Ok(self.availability_view(avail))
    }

    /// Replace the slot list of the caller's own availability record.
    pub async fn update_availability(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        slots: Vec<TimeSlot>,
        now: Ms,
    ) -> Result<AvailabilityView, EngineError> {
        let slots = validate_slot_set(slots)?;

        let _gate = self.gate.read().await;
        let (date, mut guard) = self.resolve_availability_write(&id, trainer_id).await?;

        let orphaned = orphaned_slots(&guard, date, &slots);
        if !orphaned.is_empty() {
            return Err(EngineError::SlotsInUse(orphaned));
        }

        let event = Event::AvailabilityUpdated { id, trainer_id, date, slots, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%trainer_id, availability_id = %id, %date, "availability updated");

        let avail = guard
            .availability
            .get(&date)
            .ok_or(EngineError::AvailabilityNotFound(id))?;
        Ok(self.availability_view(avail))
    }

    /// Remove the caller's own availability record. Refused while any booking
    /// on that day is active, whichever slot it holds.
    pub async fn delete_availability(&self, id: Ulid, trainer_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let (date, mut guard) = self.resolve_availability_write(&id, trainer_id).await?;

        if guard.active_bookings_on(date).next().is_some() {
            return Err(EngineError::HasActiveBookings(date));
        }

        let event = Event::AvailabilityDeleted { id, trainer_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%trainer_id, availability_id = %id, %date, "availability deleted");
        Ok(())
    }

    // ── Booking ledger ───────────────────────────────────────

    /// Reserve `slot` with `trainer_id` on `date`.
    ///
    /// All checks and the insert run under the trainer's write lock, so two
    /// concurrent requests for the same slot cannot both pass the
    /// "not already booked" check.
    pub async fn book(
        &self,
        member_id: Ulid,
        trainer_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
        now: Ms,
    ) -> Result<BookingView, EngineError> {
        let is_trainer = self
            .users
            .get(&trainer_id)
            .is_some_and(|u| u.role == Role::Trainer);
        if !is_trainer {
            return Err(EngineError::TrainerNotFound(trainer_id));
        }
        check_not_past(date, now, "Cannot book sessions for past dates")?;

        let _gate = self.gate.read().await;
        let sched = self.schedule_for(trainer_id);
        let mut guard = sched.write().await;

        let avail = guard
            .availability
            .get(&date)
            .ok_or(EngineError::NoAvailability { trainer_id, date })?;
        if !avail.slots.contains(&slot) {
            return Err(EngineError::SlotNotOffered(slot));
        }
        if let Some(existing) = guard.active_booking_for(date, &slot) {
            if existing.member_id == member_id {
                return Err(EngineError::DuplicateBooking(slot));
            }
            return Err(EngineError::SlotAlreadyBooked(slot));
        }

        let id = Ulid::new();
        let event = Event::SessionBooked { id, member_id, trainer_id, date, slot, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%member_id, %trainer_id, booking_id = %id, %date, %slot, "session booked");

        let booking = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(self.booking_view(booking))
    }

    /// Cancel the caller's own active booking, at least 24 hours ahead.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        member_id: Ulid,
        now: Ms,
    ) -> Result<BookingView, EngineError> {
        let _gate = self.gate.read().await;
        let (trainer_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(id)
            .filter(|b| b.member_id == member_id)
            .ok_or(EngineError::BookingNotFound(id))?;
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(EngineError::NotActive(booking.status));
        }
        check_lead_time(booking.date, now)?;

        let event = Event::BookingCancelled { id, trainer_id, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%member_id, %trainer_id, booking_id = %id, "booking cancelled");

        let booking = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(self.booking_view(booking))
    }

    /// Mark every active booking whose slot has ended by `now` as completed.
    /// Returns how many bookings moved.
    pub async fn complete_elapsed(&self, now: Ms) -> Result<usize, EngineError> {
        let _gate = self.gate.read().await;
        let schedules: Vec<_> = self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut completed = 0usize;
        for sched in schedules {
            let mut guard = sched.write().await;
            let elapsed: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| b.is_active() && b.slot.end_ms(b.date) <= now)
                .map(|b| b.id)
                .collect();
            for id in elapsed {
                let event = Event::BookingCompleted { id, trainer_id: guard.trainer_id, at: now };
                self.persist_and_apply(&mut guard, &event).await?;
                completed += 1;
            }
        }
        if completed > 0 {
            metrics::counter!(crate::observability::BOOKINGS_COMPLETED_TOTAL).increment(completed as u64);
            info!(completed, "marked elapsed bookings completed");
        }
        Ok(completed)
    }

    // ── Log maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        for entry in self.users.iter() {
            events.push(Event::UserUpserted { profile: entry.value().clone() });
        }

        let schedules: Vec<_> = self.schedules.iter().map(|e| e.value().clone()).collect();
        for sched in schedules {
            let guard = sched.read().await;
            for avail in guard.availability.values() {
                events.push(Event::AvailabilityCreated {
                    id: avail.id,
                    trainer_id: avail.trainer_id,
                    date: avail.date,
                    slots: avail.slots.clone(),
                    at: avail.created_at,
                });
                if avail.updated_at != avail.created_at {
                    events.push(Event::AvailabilityUpdated {
                        id: avail.id,
                        trainer_id: avail.trainer_id,
                        date: avail.date,
                        slots: avail.slots.clone(),
                        at: avail.updated_at,
                    });
                }
            }
            for booking in &guard.bookings {
                events.push(Event::SessionBooked {
                    id: booking.id,
                    member_id: booking.member_id,
                    trainer_id: booking.trainer_id,
                    date: booking.date,
                    slot: booking.slot,
                    at: booking.created_at,
                });
                match booking.status {
                    BookingStatus::Booked => {}
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: booking.id,
                        trainer_id: booking.trainer_id,
                        at: booking.updated_at,
                    }),
                    BookingStatus::Completed => events.push(Event::BookingCompleted {
                        id: booking.id,
                        trainer_id: booking.trainer_id,
                        at: booking.updated_at,
                    }),
                }
            }
        }

        let count = events.len();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
