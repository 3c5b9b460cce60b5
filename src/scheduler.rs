//! The scheduler core: a mutex-guarded [`AlarmIndex`] plus the tick worker
//! that drives it. This is the composition root's one coordination point —
//! admin tasks only mutate the index; only the tick worker emits events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{ALARM_EVENTS_TOPIC, EventBus};
use crate::error::SchedulerError;
use crate::model::{Alarm, AlarmEvent, AlarmKey, ScheduleRequest};
use crate::store;
use crate::time_index::AlarmIndex;
use crate::timeconv;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const CLEANUP_SWEEP_EVERY_TICKS: u64 = 10 * 60;
const STATS_LOG_EVERY_TICKS: u64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Outcome of `unschedule`: a silent "not found" is a success, not an error,
/// so concurrent double-deletion never surfaces as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscheduleOutcome {
    Removed,
    NotFound,
}

pub struct Scheduler {
    index: Mutex<AlarmIndex>,
    pool: SqlitePool,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            index: Mutex::new(AlarmIndex::new()),
            pool,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap()
    }

    pub fn count(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    pub fn list(&self, limit: usize, offset: usize) -> Vec<Alarm> {
        self.index.lock().unwrap().list(limit, offset).into_iter().cloned().collect()
    }

    /// Write to the store, then atomically index in memory. Writing the
    /// store first means a crash between the two leaves an orphaned store
    /// row rather than an in-memory alarm the store doesn't know about —
    /// the next `Reload` repairs it either way.
    pub async fn schedule(&self, req: ScheduleRequest) -> Result<Alarm, SchedulerError> {
        let utc_time = timeconv::local_to_utc(&req.local_time, &req.timezone)?
            .format("%H:%M:%S")
            .to_string();
        let now = Utc::now();
        let alarm = Alarm {
            code_id: req.code_id,
            email: req.email,
            local_time: req.local_time,
            utc_time,
            is_recurring: req.is_recurring,
            days_of_week: req.days_of_week,
            timezone: req.timezone,
            created_at: now,
            updated_at: now,
        };

        store::insert_alarm(&self.pool, &alarm).await?;
        self.index.lock().unwrap().insert(alarm.clone())?;
        Ok(alarm)
    }

    /// Removes from both store and memory. Absence in either is not an
    /// error — only absence in *both* is reported as `NotFound`.
    pub async fn unschedule(&self, key: AlarmKey) -> Result<UnscheduleOutcome, SchedulerError> {
        let affected = store::delete_alarm(&self.pool, &key).await?;
        let removed_in_memory = self.index.lock().unwrap().remove(&key).is_some();
        if affected > 0 || removed_in_memory {
            Ok(UnscheduleOutcome::Removed)
        } else {
            Ok(UnscheduleOutcome::NotFound)
        }
    }

    /// Empties the in-memory structures only; the store is untouched. Used
    /// by the admin surface ahead of `reload` to force a clean rebuild.
    pub fn clear(&self) {
        self.index.lock().unwrap().clear();
    }

    /// Clears in-memory state, then rebuilds it from every row in the
    /// store. A row whose `local_time`/`timezone` no longer convert is
    /// logged and skipped rather than aborting the whole reload.
    pub async fn reload(&self) -> Result<(), SchedulerError> {
        self.clear();
        let rows = store::select_all_alarms(&self.pool).await?;
        let mut loaded = 0usize;
        let mut skipped = 0usize;

        for row in rows {
            let code_id = row.code_id.clone();
            let email = row.email.clone();
            let local_time = row.local_time.clone();
            match store::row_to_alarm(row) {
                Some(alarm) => match self.index.lock().unwrap().insert(alarm) {
                    Ok(()) => loaded += 1,
                    Err(e) => {
                        warn!(code_id, email, local_time, error = %e, "duplicate alarm row during reload, skipping");
                        skipped += 1;
                    }
                },
                None => {
                    warn!(code_id, email, local_time, "malformed alarm row during reload, skipping");
                    skipped += 1;
                }
            }
        }

        info!(loaded, skipped, "reload complete");
        Ok(())
    }

    /// Every alarm due at `now_utc`, matching both time and the alarm's own
    /// weekday. O(k) in the number returned, not the size of the table.
    pub fn due_at(&self, now_utc: DateTime<Utc>) -> Vec<Alarm> {
        self.index.lock().unwrap().due_at(now_utc).into_iter().cloned().collect()
    }

    fn remove_in_memory(&self, key: &AlarmKey) {
        self.index.lock().unwrap().remove(key);
    }

    fn sweep_stale_one_shots(&self, now_utc: DateTime<Utc>) -> Vec<Alarm> {
        self.index.lock().unwrap().sweep_stale_one_shots(now_utc)
    }

    fn hour_histogram(&self) -> [usize; 24] {
        self.index.lock().unwrap().hour_histogram()
    }

    fn mark_running(&self) {
        *self.state.lock().unwrap() = SchedulerState::Running;
    }

    /// Idempotent: calling this on an already-`Stopped` scheduler is a no-op.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = SchedulerState::Stopped;
    }
}

/// The tick worker: reads the UTC wall clock once a second, fires due
/// alarms onto the bus, and runs the periodic cleanup sweep and stats log.
/// Exits promptly when `cancel` fires; never exits on a per-tick error.
pub async fn tick_loop(scheduler: Arc<Scheduler>, bus: EventBus, cancel: CancellationToken) {
    scheduler.mark_running();
    info!("scheduler tick loop started");

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(TICK_INTERVAL) => {}
        }
        ticks += 1;

        let now_utc = Utc::now();
        for alarm in scheduler.due_at(now_utc) {
            fire(&scheduler, &bus, &alarm, now_utc).await;
        }

        if ticks % CLEANUP_SWEEP_EVERY_TICKS == 0 {
            let removed = scheduler.sweep_stale_one_shots(now_utc);
            if !removed.is_empty() {
                info!(count = removed.len(), "cleanup sweep removed stale one-shot alarms");
            }
        }

        if ticks % STATS_LOG_EVERY_TICKS == 0 {
            let hist = scheduler.hour_histogram();
            info!(total = scheduler.count(), hour_histogram = ?hist, "scheduler stats");
        }
    }

    scheduler.stop();
    info!("scheduler tick loop stopped");
}

async fn fire(scheduler: &Scheduler, bus: &EventBus, alarm: &Alarm, now_utc: DateTime<Utc>) {
    let event = AlarmEvent {
        event_id: Uuid::new_v4(),
        alarm_id: alarm.alarm_id(),
        code_id: alarm.code_id.clone(),
        email: alarm.email.clone(),
        local_time: alarm.local_time.clone(),
        utc_time: alarm.utc_time.clone(),
        triggered_at: now_utc,
        is_recurring: alarm.is_recurring,
        timezone: alarm.timezone.clone(),
    };

    match bus.publish(ALARM_EVENTS_TOPIC, &event).await {
        Ok(()) => debug!(alarm_id = %event.alarm_id, event_id = %event.event_id, "alarm fired"),
        Err(e) => {
            // Documented limitation: a dropped publish for a one-shot can lose
            // that firing; recurring alarms simply retry on their next match.
            error!(alarm_id = %event.alarm_id, error = %e, "failed to publish alarm event, dropping this firing");
            return;
        }
    }

    if !alarm.is_recurring {
        let key = AlarmKey {
            code_id: alarm.code_id.clone(),
            email: alarm.email.clone(),
            local_time: alarm.local_time.clone(),
        };
        scheduler.remove_in_memory(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::days::DaysOfWeek;

    async fn test_pool() -> SqlitePool {
        use sqlx::Executor;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        pool.execute(include_str!("../migrations/20260728_000001_initial_schema.sql"))
            .await
            .unwrap();
        pool
    }

    fn req(code_id: &str) -> ScheduleRequest {
        ScheduleRequest {
            code_id: code_id.to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
            is_recurring: false,
            days_of_week: DaysOfWeek::ALL,
            timezone: "UTC".to_string(),
        }
    }

    #[tokio::test]
    async fn schedule_then_count_and_list() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        scheduler.schedule(req("A")).await.unwrap();
        scheduler.schedule(req("B")).await.unwrap();
        assert_eq!(scheduler.count(), 2);
        let listed = scheduler.list(10, 0);
        assert_eq!(listed[0].code_id, "A");
        assert_eq!(listed[1].code_id, "B");
    }

    #[tokio::test]
    async fn duplicate_schedule_rejected_and_store_untouched() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        scheduler.schedule(req("A")).await.unwrap();
        let err = scheduler.schedule(req("A")).await;
        assert!(err.is_err());
        assert_eq!(scheduler.count(), 1);
    }

    #[tokio::test]
    async fn unschedule_missing_is_not_found_not_error() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        let key = AlarmKey {
            code_id: "ghost".to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
        };
        let outcome = scheduler.unschedule(key).await.unwrap();
        assert_eq!(outcome, UnscheduleOutcome::NotFound);
    }

    #[tokio::test]
    async fn clear_then_reload_restores_state() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        scheduler.schedule(req("A")).await.unwrap();
        scheduler.schedule(req("B")).await.unwrap();
        scheduler.schedule(req("C")).await.unwrap();
        assert_eq!(scheduler.count(), 3);

        scheduler.clear();
        assert_eq!(scheduler.count(), 0);

        scheduler.reload().await.unwrap();
        assert_eq!(scheduler.count(), 3);
        let listed = scheduler.list(10, 0);
        assert_eq!(listed.iter().map(|a| a.code_id.as_str()).collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        scheduler.schedule(req("A")).await.unwrap();
        scheduler.reload().await.unwrap();
        let first = scheduler.list(10, 0);
        scheduler.reload().await.unwrap();
        let second = scheduler.list(10, 0);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].code_id, second[0].code_id);
    }

    #[tokio::test]
    async fn due_at_non_matching_instant_is_empty() {
        let pool = test_pool().await;
        let scheduler = Scheduler::new(pool);
        scheduler.schedule(req("A")).await.unwrap();
        let now = chrono::Utc::now() + chrono::Duration::hours(3);
        assert!(scheduler.due_at(now).is_empty());
    }
}
