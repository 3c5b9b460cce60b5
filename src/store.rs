//! The durable relational mirror: one `alarms` row per scheduled alarm, plus
//! `code_descriptions` for the processor's enrichment lookup.

use sqlx::SqlitePool;

use crate::days::DaysOfWeek;
use crate::error::StoreError;
use crate::model::{Alarm, AlarmKey, AlarmRow};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Insert a new alarm row. Fails with `StoreError::AlreadyExists` on a primary
/// key collision rather than surfacing the raw SQLite error.
pub async fn insert_alarm(pool: &SqlitePool, alarm: &Alarm) -> Result<(), StoreError> {
    let result = sqlx::query(
        "INSERT INTO alarms (code_id, email, local_time, utc_time, is_recurring, days_of_week, timezone, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&alarm.code_id)
    .bind(&alarm.email)
    .bind(&alarm.local_time)
    .bind(&alarm.utc_time)
    .bind(alarm.is_recurring)
    .bind(alarm.days_of_week.render())
    .bind(&alarm.timezone)
    .bind(alarm.created_at)
    .bind(alarm.updated_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
            code_id: alarm.code_id.clone(),
            email: alarm.email.clone(),
            local_time: alarm.local_time.clone(),
        }),
        Err(e) => Err(StoreError::Database(e)),
    }
}

/// Delete the row matching `key`. Returns the number of affected rows (0 or 1)
/// rather than erroring when the row is already absent.
pub async fn delete_alarm(pool: &SqlitePool, key: &AlarmKey) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM alarms WHERE code_id = ? AND email = ? AND local_time = ?")
        .bind(&key.code_id)
        .bind(&key.email)
        .bind(&key.local_time)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn select_all_alarms(pool: &SqlitePool) -> Result<Vec<AlarmRow>, StoreError> {
    let rows = sqlx::query_as::<_, AlarmRow>(
        "SELECT code_id, email, local_time, utc_time, is_recurring, days_of_week, timezone, created_at, updated_at
         FROM alarms",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Look up a human-readable description for `code_id`. Absence is not an
/// error: the processor substitutes a synthetic description.
pub async fn get_code_description(pool: &SqlitePool, code_id: &str) -> Result<Option<String>, StoreError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT description FROM code_descriptions WHERE code_id = ?")
        .bind(code_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(d,)| d))
}

pub async fn upsert_code_description(pool: &SqlitePool, code_id: &str, description: &str) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO code_descriptions (code_id, description) VALUES (?, ?)
         ON CONFLICT(code_id) DO UPDATE SET description = excluded.description",
    )
    .bind(code_id)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(())
}

/// Convert a stored row into the in-memory `Alarm` type, recomputing
/// `utc_time` when the row predates that column and parsing `days_of_week`.
/// Returns `None` (rather than erroring) on malformed rows so `Reload` can
/// skip and log them without aborting.
pub fn row_to_alarm(row: AlarmRow) -> Option<Alarm> {
    let days_of_week = DaysOfWeek::parse(&row.days_of_week).ok()?;
    let utc_time = match row.utc_time {
        Some(t) => t,
        None => crate::timeconv::local_to_utc(&row.local_time, &row.timezone)
            .ok()?
            .format("%H:%M:%S")
            .to_string(),
    };
    Some(Alarm {
        code_id: row.code_id,
        email: row.email,
        local_time: row.local_time,
        utc_time,
        is_recurring: row.is_recurring,
        days_of_week,
        timezone: row.timezone,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
