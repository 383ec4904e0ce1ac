//! Operator HTTP API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chime_table::{MigrationMode, MigrationRouter, TableError, TargetKey};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ReminderError;
use crate::management::{ReminderManagement, ReminderPage, ReminderView};
use crate::partition::{ReminderPartitionService, ServiceStatus};
use crate::registry::ReminderRegistry;
use crate::service::ReminderHandle;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ReminderRegistry>,
    pub partition: Arc<ReminderPartitionService>,
    pub management: ReminderManagement,
    pub migration: Option<Arc<MigrationRouter>>,
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Storage migration
        .route("/migration", get(get_migration).put(change_migration_mode))
        .route("/migration/disable", post(disable_migration))
        // Reminder queries
        .route("/reminders", get(list_reminders))
        .route("/reminders/overdue", get(list_overdue))
        .route("/reminders/upcoming", get(list_upcoming))
        .route("/reminders/{target}", get(list_for_target))
        .route(
            "/reminders/{target}/{name}",
            get(get_reminder).put(put_reminder).delete(delete_reminder),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Ready once the partition has loaded its range.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.partition.status();
    let body = ReadyResponse {
        ready: status == ServiceStatus::Started,
        member: state.partition.member().to_owned(),
        status,
        active_timers: state.partition.active_timers(),
    };
    let code = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn get_migration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationResponse>, StatusCode> {
    let router = state.migration.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let mode = router.mode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(MigrationResponse { mode }))
}

async fn change_migration_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChangeModeRequest>,
) -> Result<Json<MigrationResponse>, StatusCode> {
    let router = state.migration.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let mode: MigrationMode = request.mode.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    router.change_mode(mode).await.map_err(|e| {
        warn!(mode = %mode, error = %e, "Failed to change migration mode");
        table_status(&e)
    })?;
    info!(mode = %mode, "Migration mode changed over the API");
    Ok(Json(MigrationResponse { mode }))
}

async fn disable_migration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationResponse>, StatusCode> {
    let router = state.migration.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    router.disable_migration_tooling();
    Ok(Json(MigrationResponse {
        mode: MigrationMode::Disabled,
    }))
}

async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ReminderPage>, StatusCode> {
    state
        .management
        .list_all(query.page_size, query.continuation.as_deref())
        .await
        .map(Json)
        .map_err(|e| reminder_status(&e))
}

async fn list_overdue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OverdueQuery>,
) -> Result<Json<Vec<ReminderView>>, StatusCode> {
    let overdue_by = seconds(query.overdue_by_secs)?;
    state
        .management
        .list_overdue(overdue_by)
        .await
        .map(Json)
        .map_err(|e| reminder_status(&e))
}

async fn list_upcoming(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Vec<ReminderView>>, StatusCode> {
    let horizon = seconds(query.horizon_secs)?;
    state
        .management
        .upcoming(horizon)
        .await
        .map(Json)
        .map_err(|e| reminder_status(&e))
}

async fn list_for_target(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Result<Json<Vec<ReminderView>>, StatusCode> {
    state
        .management
        .list_for_target(&TargetKey::new(target))
        .await
        .map(Json)
        .map_err(|e| reminder_status(&e))
}

/// Registers through the registry, as an actor would.
async fn put_reminder(
    State(state): State<Arc<AppState>>,
    Path((target, name)): Path<(String, String)>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<ReminderHandle>, StatusCode> {
    let due = TimeDelta::try_milliseconds(request.due_ms).ok_or(StatusCode::BAD_REQUEST)?;
    let period = TimeDelta::try_milliseconds(request.period_ms).ok_or(StatusCode::BAD_REQUEST)?;
    state
        .registry
        .for_target(target)
        .register_or_update(&name, due, period)
        .await
        .map(Json)
        .map_err(|e| reminder_status(&e))
}

async fn get_reminder(
    State(state): State<Arc<AppState>>,
    Path((target, name)): Path<(String, String)>,
) -> Result<Json<ReminderHandle>, StatusCode> {
    state
        .registry
        .for_target(target)
        .get_reminder(&name)
        .await
        .map_err(|e| reminder_status(&e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_reminder(
    State(state): State<Arc<AppState>>,
    Path((target, name)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    match state.management.delete(&TargetKey::new(target), &name).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reminder_status(&e)),
    }
}

fn seconds(value: i64) -> Result<TimeDelta, StatusCode> {
    TimeDelta::try_seconds(value).ok_or(StatusCode::BAD_REQUEST)
}

fn reminder_status(err: &ReminderError) -> StatusCode {
    match err {
        ReminderError::InvalidArgument(_) | ReminderError::OutOfRange { .. } => {
            StatusCode::BAD_REQUEST
        }
        ReminderError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        ReminderError::NotReady(_)
        | ReminderError::Stopped
        | ReminderError::NoOwner(_)
        | ReminderError::ServiceNotRegistered(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReminderError::Storage(e) => table_status(e),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn table_status(err: &TableError) -> StatusCode {
    match err {
        TableError::ConcurrencyConflict => StatusCode::CONFLICT,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Request and response types

#[derive(Deserialize)]
struct ChangeModeRequest {
    mode: String,
}

#[derive(Deserialize)]
struct RegisterRequest {
    /// Milliseconds until the first tick; -1 waits one period.
    due_ms: i64,
    /// Milliseconds between ticks; 0 or -1 registers a one-shot.
    #[serde(default)]
    period_ms: i64,
}

#[derive(Deserialize)]
struct ListQuery {
    page_size: Option<usize>,
    continuation: Option<String>,
}

#[derive(Deserialize)]
struct OverdueQuery {
    #[serde(default)]
    overdue_by_secs: i64,
}

#[derive(Deserialize)]
struct UpcomingQuery {
    #[serde(default = "default_horizon_secs")]
    horizon_secs: i64,
}

fn default_horizon_secs() -> i64 {
    3600
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    member: String,
    status: ServiceStatus,
    active_timers: usize,
}

#[derive(Serialize)]
struct MigrationResponse {
    mode: MigrationMode,
}
