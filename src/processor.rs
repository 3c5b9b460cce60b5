//! Consumes `alarm_events`: enriches each firing with a human-readable
//! description, publishes an `EmailRequest`, and for one-shot alarms deletes
//! the now-stale store row. Tolerant of replays — the same event may be
//! delivered twice under the bus's at-least-once contract, and every effect
//! here beyond "publish another email request" is idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{ALARM_EVENTS_TOPIC, EMAIL_REQUESTS_TOPIC, EventBus};
use crate::model::{AlarmEvent, AlarmKey, EmailRequest};
use crate::store;

#[derive(Default)]
pub struct ProcessorStats {
    processed: AtomicU64,
}

impl ProcessorStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
    }
}

pub struct Processor {
    pool: SqlitePool,
    stats: Arc<ProcessorStats>,
}

impl Processor {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    async fn handle(&self, bus: &EventBus, event: AlarmEvent) {
        let description = match store::get_code_description(&self.pool, &event.code_id).await {
            Ok(Some(description)) => description,
            Ok(None) => default_description(&event.code_id),
            Err(e) => {
                warn!(code_id = %event.code_id, error = %e, "description lookup failed, substituting synthetic description");
                default_description(&event.code_id)
            }
        };

        let request = EmailRequest {
            to_email: event.email.clone(),
            code_id: event.code_id.clone(),
            description,
            alarm_time: event.local_time.clone(),
            timezone: event.timezone.clone(),
        };

        if let Err(e) = bus.publish(EMAIL_REQUESTS_TOPIC, &request).await {
            error!(alarm_id = %event.alarm_id, event_id = %event.event_id, error = %e, "failed to publish email request");
        }

        if !event.is_recurring {
            let key = AlarmKey {
                code_id: event.code_id.clone(),
                email: event.email.clone(),
                local_time: event.local_time.clone(),
            };
            // Not retried on failure: the in-memory scheduler has already
            // dropped this alarm, so a residual row only costs a stale
            // entry that the next `Reload` (or manual admin action) clears.
            match store::delete_alarm(&self.pool, &key).await {
                Ok(0) => debug!(alarm_id = %event.alarm_id, "one-shot store row already absent (replay)"),
                Ok(_) => debug!(alarm_id = %event.alarm_id, "one-shot store row deleted"),
                Err(e) => error!(alarm_id = %event.alarm_id, error = %e, "failed to delete one-shot store row"),
            }
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
    }
}

fn default_description(code_id: &str) -> String {
    format!("Alarm code {code_id} has been triggered")
}

/// Subscriber task: consumes `alarm_events` until `cancel` fires.
pub async fn run(bus: EventBus, processor: Arc<Processor>, cancel: CancellationToken) {
    info!("processor started");
    let publish_bus = bus.clone();
    bus.subscribe(ALARM_EVENTS_TOPIC, cancel, move |event: AlarmEvent| {
        let processor = processor.clone();
        let bus = publish_bus.clone();
        async move { processor.handle(&bus, event).await }
    })
    .await;
    info!("processor shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn event(code_id: &str, is_recurring: bool) -> AlarmEvent {
        AlarmEvent {
            event_id: uuid::Uuid::new_v4(),
            alarm_id: format!("alarm_{code_id}_u@x_09:00:00"),
            code_id: code_id.to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
            utc_time: "09:00:00".to_string(),
            triggered_at: chrono::Utc::now(),
            is_recurring,
            timezone: "UTC".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_description_falls_back_to_synthetic() {
        let pool = test_pool().await;
        assert_eq!(store::get_code_description(&pool, "A").await.unwrap(), None);
        assert_eq!(default_description("A"), "Alarm code A has been triggered");
    }

    #[tokio::test]
    async fn present_description_is_used_verbatim() {
        let pool = test_pool().await;
        store::upsert_code_description(&pool, "A", "Take your medication").await.unwrap();
        let description = store::get_code_description(&pool, "A").await.unwrap();
        assert_eq!(description.as_deref(), Some("Take your medication"));
    }

    #[tokio::test]
    async fn one_shot_delete_is_idempotent_across_replays() {
        let pool = test_pool().await;
        store::insert_alarm(
            &pool,
            &crate::model::Alarm {
                code_id: "A".to_string(),
                email: "u@x".to_string(),
                local_time: "09:00:00".to_string(),
                utc_time: "09:00:00".to_string(),
                is_recurring: false,
                days_of_week: crate::days::DaysOfWeek::ALL,
                timezone: "UTC".to_string(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

        let key = AlarmKey {
            code_id: "A".to_string(),
            email: "u@x".to_string(),
            local_time: "09:00:00".to_string(),
        };
        let first = store::delete_alarm(&pool, &key).await.unwrap();
        let second = store::delete_alarm(&pool, &key).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn recurring_event_leaves_store_untouched() {
        let pool = test_pool().await;
        let processor = Processor::new(pool.clone());
        let _ = event("R", true);
        // Recurring firings never reach the delete branch in `handle`; this
        // just pins that the processor doesn't require a store row to exist
        // for a code it has never seen.
        let rows = store::select_all_alarms(&pool).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(processor.stats().processed(), 0);
    }
}
