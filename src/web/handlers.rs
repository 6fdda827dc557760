//! HTTP request handlers.

use super::AppState;
use crate::db::{
    CheckConfig, DbError, HealthState, Status, Target, TargetKey, TargetKind,
};
use crate::engine::CheckOutcome;
use crate::scheduler::TriggerError;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

fn parse_key(kind: &str, id: i64) -> Result<TargetKey, (StatusCode, String)> {
    let kind = TargetKind::parse(kind).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("unknown target kind {:?}", kind),
        )
    })?;
    Ok(TargetKey { kind, id })
}

// ============================================================================
// Targets: read
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let key = match parse_key(&kind, id) {
        Ok(key) => key,
        Err(rejection) => return rejection.into_response(),
    };

    match state.store.get_target(key) {
        Ok(target) => Json(target).into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Targets: write (consumed by the surrounding CRUD layer; every mutation
// notifies the scheduler so the live registry stays current)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    #[serde(default)]
    pub application_id: Option<i64>,
    #[serde(default)]
    pub inherit_from_app: bool,
    pub check: CheckConfig,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let kind = match TargetKind::parse(&kind) {
        Some(kind) => kind,
        None => {
            return (StatusCode::BAD_REQUEST, format!("unknown target kind {:?}", kind))
                .into_response()
        }
    };

    let mut target = Target {
        kind,
        id: 0,
        name: req.name,
        check: req.check,
        inherit_from_app: req.inherit_from_app,
        application_id: req.application_id,
        health: HealthState::default(),
    };

    match state.store.add_target(&mut target) {
        Ok(_) => {
            if let Err(e) = state.scheduler.register(target.key()).await {
                tracing::error!("Failed to register {}: {}", target.key(), e);
            }
            Json(target).into_response()
        }
        Err(e @ DbError::Invalid(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let key = match parse_key(&kind, id) {
        Ok(key) => key,
        Err(rejection) => return rejection.into_response(),
    };

    let existing = match state.store.get_target(key) {
        Ok(target) => target,
        Err(DbError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    // Re-parenting is not supported here; the owning application is fixed.
    let updated = Target {
        kind: key.kind,
        id: key.id,
        name: req.name,
        check: req.check,
        inherit_from_app: req.inherit_from_app,
        application_id: existing.application_id,
        health: existing.health,
    };

    match state.store.update_target(&updated) {
        Ok(()) => {
            if let Err(e) = state.scheduler.register(key).await {
                tracing::error!("Failed to refresh registration for {}: {}", key, e);
            }
            Json(updated).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let key = match parse_key(&kind, id) {
        Ok(key) => key,
        Err(rejection) => return rejection.into_response(),
    };

    // Deregister first so the target cannot be dispatched while the row
    // disappears.
    state.scheduler.deregister(key).await;

    match state.store.delete_target(key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Maintenance override
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

/// Enter or leave a maintenance window. While under maintenance the engine
/// keeps probing for telemetry but never mutates the published status.
pub async fn handle_set_maintenance(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(req): Json<MaintenanceRequest>,
) -> impl IntoResponse {
    let key = match parse_key(&kind, id) {
        Ok(key) => key,
        Err(rejection) => return rejection.into_response(),
    };

    let target = match state.store.get_target(key) {
        Ok(target) => target,
        Err(DbError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let status = if req.enabled {
        Status::UnderMaintenance
    } else if target.under_maintenance() {
        // Leaving maintenance: back to operational until the probes say
        // otherwise.
        Status::Operational
    } else {
        target.health.status
    };

    match state.store.set_status(key, status) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Manual trigger
// ============================================================================

/// Manual "run check now". Goes through the same pipeline as a scheduled
/// run and is rejected while a run is already in flight for the target.
pub async fn handle_run_check(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let key = match parse_key(&kind, id) {
        Ok(key) => key,
        Err(rejection) => return rejection.into_response(),
    };

    match state.scheduler.run_now(key).await {
        Ok(CheckOutcome::Completed { health, .. }) => Json(health).into_response(),
        Ok(CheckOutcome::Disabled) | Err(TriggerError::Disabled(_)) => {
            (StatusCode::BAD_REQUEST, "Checking is disabled for this target").into_response()
        }
        Err(TriggerError::AlreadyRunning(_)) => (
            StatusCode::CONFLICT,
            "A check is already running for this target",
        )
            .into_response(),
        Err(TriggerError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(TriggerError::Engine(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
