use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that periodically marks finished sessions completed.
pub async fn run_completion_sweep(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine, now_ms()).await;
    }
}

async fn sweep_once(engine: &Engine, now: Ms) -> usize {
    match engine.complete_elapsed(now).await {
        Ok(n) => {
            debug!(completed = n, "completion sweep");
            n
        }
        Err(e) => {
            error!("completion sweep failed: {e}");
            0
        }
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;
    use crate::model::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("gymbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn user(engine: &Engine, name: &str, role: Role) -> Ulid {
        let id = Ulid::new();
        engine
            .upsert_user(UserProfile {
                id,
                name: name.into(),
                email: format!("{}@gym.test", name.to_lowercase()),
                role,
                profile_pic: None,
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn sweep_completes_finished_sessions() {
        let engine = Engine::new(test_wal_path("sweep.wal")).unwrap();
        let trainer = user(&engine, "Tina", Role::Trainer).await;
        let member = user(&engine, "Alice", Role::Member).await;

        let date = NaiveDate::from_ymd_opt(2030, 2, 1).unwrap();
        let before = day_start_ms(date) - 3_600_000;
        let slot = TimeSlot::parse("07:00", "08:00").unwrap();
        engine.create_availability(trainer, date, vec![slot], before).await.unwrap();
        engine.book(member, trainer, date, slot, before).await.unwrap();

        assert_eq!(sweep_once(&engine, before).await, 0);
        let after = slot.end_ms(date);
        assert_eq!(sweep_once(&engine, after).await, 1);

        let bookings = engine.list_member_bookings(member).await;
        assert_eq!(bookings[0].status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let engine = Engine::new(test_wal_path("compactor.wal")).unwrap();
        for i in 0..5 {
            user(&engine, &format!("Member{i}"), Role::Member).await;
        }

        assert!(!compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(compact_if_needed(&engine, 4).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
