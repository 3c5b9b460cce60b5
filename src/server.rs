//! The admin HTTP surface: a thin axum layer over the scheduler and store.
//! Business logic lives in `scheduler`/`store`; handlers here only translate
//! HTTP in and out and pick status codes per the documented contract.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

use crate::bus::EventBus;
use crate::days::DaysOfWeek;
use crate::error::SchedulerError;
use crate::model::{Alarm, AlarmKey, ScheduleRequest};
use crate::notifier::NotifierStats;
use crate::processor::ProcessorStats;
use crate::scheduler::{Scheduler, SchedulerState, UnscheduleOutcome};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub pool: SqlitePool,
    pub bus: EventBus,
    pub default_timezone: String,
    pub processor_stats: Arc<ProcessorStats>,
    pub notifier_stats: Arc<NotifierStats>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/alarms/", post(create_alarm).get(list_alarms).delete(delete_alarm))
        .route("/alarms/count", get(count_alarms))
        .route("/reload", post(reload))
        .route("/health", get(health))
        .route("/jobs/", get(list_alarms))
        .route("/stats", get(stats))
        .route("/stats/reset", post(reset_stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateAlarmBody {
    code_id: String,
    email: String,
    time: String,
    #[serde(default)]
    is_recurring: bool,
    days_of_week: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug, Serialize)]
struct AlarmView {
    code_id: String,
    email: String,
    time: String,
    utc_time: String,
    is_recurring: bool,
    days_of_week: String,
    timezone: String,
}

impl From<&Alarm> for AlarmView {
    fn from(alarm: &Alarm) -> Self {
        Self {
            code_id: alarm.code_id.clone(),
            email: alarm.email.clone(),
            time: alarm.local_time.clone(),
            utc_time: alarm.utc_time.clone(),
            is_recurring: alarm.is_recurring,
            days_of_week: alarm.days_of_week.render(),
            timezone: alarm.timezone.clone(),
        }
    }
}

async fn create_alarm(State(state): State<AppState>, axum::Json(body): axum::Json<CreateAlarmBody>) -> Response {
    let days_of_week = match body.days_of_week.as_deref() {
        Some(s) => match DaysOfWeek::parse(s) {
            Ok(d) => d,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => DaysOfWeek::ALL,
    };
    let timezone = body.timezone.unwrap_or(state.default_timezone.clone());

    let req = ScheduleRequest {
        code_id: body.code_id,
        email: body.email,
        local_time: body.time,
        is_recurring: body.is_recurring,
        days_of_week,
        timezone,
    };

    match state.scheduler.schedule(req).await {
        Ok(alarm) => (StatusCode::OK, axum::Json(AlarmView::from(&alarm))).into_response(),
        Err(e) => scheduler_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_alarms(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let limit = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);
    let alarms: Vec<AlarmView> = state.scheduler.list(limit, offset).iter().map(AlarmView::from).collect();
    (StatusCode::OK, axum::Json(alarms)).into_response()
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: usize,
}

async fn count_alarms(State(state): State<AppState>) -> Response {
    (StatusCode::OK, axum::Json(CountResponse { count: state.scheduler.count() })).into_response()
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    code_id: String,
    email: String,
    time: String,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    status: &'static str,
}

async fn delete_alarm(State(state): State<AppState>, Query(query): Query<DeleteQuery>) -> Response {
    let key = AlarmKey {
        code_id: query.code_id,
        email: query.email,
        local_time: query.time,
    };
    match state.scheduler.unschedule(key).await {
        Ok(UnscheduleOutcome::Removed) => (StatusCode::OK, axum::Json(DeleteResponse { status: "deleted" })).into_response(),
        Ok(UnscheduleOutcome::NotFound) => {
            (StatusCode::OK, axum::Json(DeleteResponse { status: "not found" })).into_response()
        }
        Err(e) => scheduler_error_response(&e),
    }
}

async fn reload(State(state): State<AppState>) -> Response {
    match state.scheduler.reload().await {
        Ok(()) => (StatusCode::OK, axum::Json(CountResponse { count: state.scheduler.count() })).into_response(),
        Err(e) => scheduler_error_response(&e),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    scheduler_state: &'static str,
    alarm_count: usize,
    store_connected: bool,
    bus_connected: bool,
}

async fn health(State(state): State<AppState>) -> Response {
    let store_connected = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let bus_connected = state
        .bus
        .publish("health_check", &serde_json::json!({"probe": true}))
        .await
        .is_ok();
    if !bus_connected {
        warn!("health check: bus publish failed");
    }

    let scheduler_state = match state.scheduler.state() {
        SchedulerState::Idle => "idle",
        SchedulerState::Running => "running",
        SchedulerState::Stopped => "stopped",
    };

    let body = HealthResponse {
        scheduler_state,
        alarm_count: state.scheduler.count(),
        store_connected,
        bus_connected,
    };
    let status = if store_connected { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, axum::Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    processed: u64,
    sent: u64,
    failed: u64,
}

async fn stats(State(state): State<AppState>) -> Response {
    let body = StatsResponse {
        processed: state.processor_stats.processed(),
        sent: state.notifier_stats.sent(),
        failed: state.notifier_stats.failed(),
    };
    (StatusCode::OK, axum::Json(body)).into_response()
}

async fn reset_stats(State(state): State<AppState>) -> Response {
    state.processor_stats.reset();
    state.notifier_stats.reset();
    StatusCode::OK.into_response()
}

fn scheduler_error_response(err: &SchedulerError) -> Response {
    match err {
        SchedulerError::AlreadyExists(id) => (StatusCode::CONFLICT, format!("alarm already exists: {id}")).into_response(),
        SchedulerError::Time(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        SchedulerError::Store(e) => {
            warn!(error = %e, "store error handling admin request");
            (StatusCode::INTERNAL_SERVER_ERROR, "store unavailable").into_response()
        }
    }
}
