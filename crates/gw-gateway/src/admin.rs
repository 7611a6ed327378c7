//! Pool administration HTTP surface (spec §6) plus the unauthenticated boot
//! probe the portal hits before it knows whether an API key is configured.
//! Grounded on `portal/backend/src/handlers.rs`'s axum handler shape, with
//! the route/query content from `original_source/server/routes/containers.py`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/containers", get(list_containers))
        .route("/containers/status", get(pool_status))
        .route("/containers/:target_type/allocate", post(allocate))
        .route("/containers/:session_id/release", post(release))
        .route("/containers/refresh", post(refresh))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    target_type: Option<String>,
    #[serde(default)]
    available_only: bool,
}

async fn list_containers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let workloads = state.pool.force_refresh().await;
    let filtered: Vec<_> = workloads
        .into_iter()
        .filter(|w| {
            query
                .target_type
                .as_deref()
                .map(|t| w.target_type() == t)
                .unwrap_or(true)
        })
        .filter(|w| !query.available_only || w.is_healthy())
        .collect();
    Json(json!({ "containers": filtered }))
}

async fn pool_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.pool.status()))
}

#[derive(Debug, Deserialize)]
pub struct AllocateQuery {
    session_id: String,
}

async fn allocate(
    State(state): State<AppState>,
    Path(target_type): Path<String>,
    Query(query): Query<AllocateQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.pool.allocate(&query.session_id, &target_type).await {
        Some(workload) => Ok(Json(json!(workload))),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": format!("no capacity for target type: {target_type}") })),
        )),
    }
}

async fn release(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    if state.pool.release(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("no allocation for session: {session_id}") })),
        ))
    }
}

async fn refresh(State(state): State<AppState>) -> Json<serde_json::Value> {
    let workloads = state.pool.force_refresh().await;
    Json(json!({ "refreshed": workloads.len() }))
}

/// Unauthenticated boot probe the portal's login screen polls before it
/// knows whether `API_KEY` is configured (spec §6, SPEC_FULL.md §10
/// supplemented feature (b)).
pub async fn init_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let requires_api_key = state.config.api_key.is_some();
    Json(json!({
        "requires_api_key": requires_api_key,
        "is_configured": state.config.legacy_use_url.is_some(),
        "current_provider": match state.config.orchestrator {
            gw_common::config::OrchestratorKind::Docker => "docker",
            gw_common::config::OrchestratorKind::Kubernetes => "kubernetes",
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_defaults_available_only_to_false() {
        let q: ListQuery = serde_json::from_str("{}").unwrap();
        assert!(!q.available_only);
        assert!(q.target_type.is_none());
    }
}
