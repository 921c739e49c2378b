mod checks;
mod error;
mod mutations;
mod projection;
mod queries;

pub use checks::now_ms;
pub use error::{EngineError, ErrorKind};
pub use projection::available_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<TrainerSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then handle the non-append command
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            // Every caller in the batch is told it failed, so none of it may land.
            wal.rollback();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Reverse lookups from entity ids to the trainer whose schedule holds them.
#[derive(Default)]
pub(super) struct EntityIndex {
    /// availability id → (trainer id, date)
    availability: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// booking id → trainer id
    bookings: DashMap<Ulid, Ulid>,
    /// member id → booking ids, in creation order
    by_member: DashMap<Ulid, Vec<Ulid>>,
}

pub struct Engine {
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    pub(super) users: DashMap<Ulid, UserProfile>,
    pub(super) index: EntityIndex,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction takes it exclusively so that
    /// nothing lands in the old log between snapshot and swap.
    pub(super) gate: RwLock<()>,
}

/// Apply an event directly to a TrainerSchedule (no locking — caller holds the lock).
fn apply_to_schedule(sched: &mut TrainerSchedule, event: &Event, index: &EntityIndex) {
    match event {
        Event::AvailabilityCreated {
            id,
            trainer_id,
            date,
            slots,
            at,
        } => {
            sched.availability.insert(
                *date,
                Availability {
                    id: *id,
                    trainer_id: *trainer_id,
                    date: *date,
                    slots: slots.clone(),
                    created_at: *at,
                    updated_at: *at,
                },
            );
            index.availability.insert(*id, (*trainer_id, *date));
        }
        Event::AvailabilityUpdated { date, slots, at, .. } => {
            if let Some(avail) = sched.availability.get_mut(date) {
                avail.slots = slots.clone();
                avail.updated_at = *at;
            }
        }
        Event::AvailabilityDeleted { id, date, .. } => {
            sched.availability.remove(date);
            index.availability.remove(id);
        }
        Event::SessionBooked {
            id,
            member_id,
            trainer_id,
            date,
            slot,
            at,
        } => {
            sched.insert_booking(Booking {
                id: *id,
                member_id: *member_id,
                trainer_id: *trainer_id,
                date: *date,
                slot: *slot,
                status: BookingStatus::Booked,
                created_at: *at,
                updated_at: *at,
            });
            index.bookings.insert(*id, *trainer_id);
            index.by_member.entry(*member_id).or_default().push(*id);
        }
        Event::BookingCancelled { id, at, .. } => {
            set_status(sched, *id, BookingStatus::Cancelled, *at);
        }
        Event::BookingCompleted { id, at, .. } => {
            set_status(sched, *id, BookingStatus::Completed, *at);
        }
        // Users live in the directory map, not in a schedule
        Event::UserUpserted { .. } => {}
    }
}

fn set_status(sched: &mut TrainerSchedule, id: Ulid, status: BookingStatus, at: Ms) {
    if let Some(booking) = sched.booking_mut(id)
        && booking.status.can_transition_to(status)
    {
        booking.status = status;
        booking.updated_at = at;
    }
}

/// Extract the owning trainer from an event (for schedule events).
fn event_trainer_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AvailabilityCreated { trainer_id, .. }
        | Event::AvailabilityUpdated { trainer_id, .. }
        | Event::AvailabilityDeleted { trainer_id, .. }
        | Event::SessionBooked { trainer_id, .. }
        | Event::BookingCancelled { trainer_id, .. }
        | Event::BookingCompleted { trainer_id, .. } => Some(*trainer_id),
        Event::UserUpserted { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            schedules: DashMap::new(),
            users: DashMap::new(),
            index: EntityIndex::default(),
            wal_tx,
            gate: RwLock::new(()),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds. Never use blocking_write here: this runs inside the runtime.
        for event in &events {
            match event {
                Event::UserUpserted { profile } => {
                    engine.users.insert(profile.id, profile.clone());
                }
                other => {
                    let Some(trainer_id) = event_trainer_id(other) else {
                        continue;
                    };
                    let sched = engine.schedule_for(trainer_id);
                    let Ok(mut guard) = sched.try_write() else {
                        return Err(io::Error::other("replay: schedule lock contended"));
                    };
                    apply_to_schedule(&mut guard, other, &engine.index);
                }
            }
        }

        tracing::debug!(
            events = events.len(),
            trainers = engine.schedules.len(),
            users = engine.users.len(),
            "replayed WAL"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, trainer_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(trainer_id).map(|e| e.value().clone())
    }

    /// Get or lazily create the schedule for a trainer.
    pub(super) fn schedule_for(&self, trainer_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(trainer_id)
            .or_insert_with(|| Arc::new(RwLock::new(TrainerSchedule::new(trainer_id))))
            .value()
            .clone()
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        sched: &mut TrainerSchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(sched, event, &self.index);
        Ok(())
    }

    pub(super) async fn persist_user(&self, profile: UserProfile) -> Result<(), EngineError> {
        self.wal_append(&Event::UserUpserted { profile: profile.clone() })
            .await?;
        self.users.insert(profile.id, profile);
        Ok(())
    }

    /// Lookup booking → trainer, get schedule, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TrainerSchedule>), EngineError> {
        let trainer_id = self
            .index
            .bookings
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let sched = self
            .get_schedule(&trainer_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let guard = sched.write_owned().await;
        Ok((trainer_id, guard))
    }

    /// Lookup availability → owner, acquire the owner's write lock. Records
    /// owned by anyone other than `trainer_id` are reported as not found.
    pub(super) async fn resolve_availability_write(
        &self,
        availability_id: &Ulid,
        trainer_id: Ulid,
    ) -> Result<(NaiveDate, tokio::sync::OwnedRwLockWriteGuard<TrainerSchedule>), EngineError> {
        let not_found = EngineError::AvailabilityNotFound(*availability_id);
        let (owner, date) = match self.index.availability.get(availability_id) {
            Some(entry) => *entry.value(),
            None => return Err(not_found),
        };
        if owner != trainer_id {
            return Err(not_found);
        }
        let sched = self.get_schedule(&owner).ok_or(not_found)?;
        let guard = sched.write_owned().await;
        // Deleted while we waited for the lock
        if guard.availability.get(&date).is_none_or(|a| a.id != *availability_id) {
            return Err(EngineError::AvailabilityNotFound(*availability_id));
        }
        Ok((date, guard))
    }

    /// Profile for embedding; unknown ids still render.
    pub(super) fn profile(&self, id: Ulid) -> PublicProfile {
        self.users
            .get(&id)
            .map(|u| PublicProfile::from(u.value()))
            .unwrap_or_else(|| PublicProfile::unknown(id))
    }

    pub(super) fn availability_view(&self, avail: &Availability) -> AvailabilityView {
        AvailabilityView {
            id: avail.id,
            trainer: self.profile(avail.trainer_id),
            date: avail.date,
            slots: avail.slots.clone(),
            created_at: avail.created_at,
            updated_at: avail.updated_at,
        }
    }

    pub(super) fn booking_view(&self, booking: &Booking) -> BookingView {
        BookingView {
            id: booking.id,
            member: self.profile(booking.member_id),
            trainer: self.profile(booking.trainer_id),
            date: booking.date,
            slot: booking.slot,
            status: booking.status,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}
