//! The alarm record and the transient events it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::days::DaysOfWeek;

/// A durable alarm. Identity is `(code_id, email, local_time)`.
#[derive(Debug, Clone)]
pub struct Alarm {
    pub code_id: String,
    pub email: String,
    /// Canonical "HH:MM:SS" in `timezone`, preserved verbatim for display.
    pub local_time: String,
    /// "HH:MM:SS" in UTC, derived from `local_time` + `timezone` at last update.
    pub utc_time: String,
    pub is_recurring: bool,
    pub days_of_week: DaysOfWeek,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// The canonical in-memory identifier, `"alarm_{code_id}_{email}_{local_time}"`.
    pub fn alarm_id(&self) -> String {
        format!("alarm_{}_{}_{}", self.code_id, self.email, self.local_time)
    }
}

/// Raw row as read back from the store. `days_of_week` and `utc_time` may be
/// absent on older schemas (see `Reload`'s schema-compat fallback).
#[derive(Debug, Clone, FromRow)]
pub struct AlarmRow {
    pub code_id: String,
    pub email: String,
    pub local_time: String,
    pub utc_time: Option<String>,
    pub is_recurring: bool,
    pub days_of_week: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs to `Scheduler::schedule`.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub code_id: String,
    pub email: String,
    pub local_time: String,
    pub is_recurring: bool,
    pub days_of_week: DaysOfWeek,
    pub timezone: String,
}

/// Key identifying a single alarm row, used by `Unschedule` and processor deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlarmKey {
    pub code_id: String,
    pub email: String,
    pub local_time: String,
}

/// Published to the `alarm_events` topic when an alarm's instant arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Fresh per fire, independent of the stable `alarm_id` — lets a consumer
    /// that needs exactly-once semantics dedupe individual firings.
    pub event_id: Uuid,
    pub alarm_id: String,
    pub code_id: String,
    pub email: String,
    pub local_time: String,
    pub utc_time: String,
    pub triggered_at: DateTime<Utc>,
    pub is_recurring: bool,
    pub timezone: String,
}

/// Published to the `email_requests` topic by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to_email: String,
    pub code_id: String,
    pub description: String,
    pub alarm_time: String,
    pub timezone: String,
}
