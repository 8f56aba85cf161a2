//! HTTP request handlers.

use super::AppState;
use crate::db::{DataError, Observer, Record, Target, TimeRange};
use crate::persistence::Lifecycle;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

/// Header carrying the shared access token.
pub const TOKEN_HEADER: &str = "x-sword-token";

fn check_token(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let presented = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != state.config.token {
        return Err((StatusCode::FORBIDDEN, "token invalid").into_response());
    }
    Ok(())
}

fn error_response(e: DataError) -> Response {
    let status = match e {
        DataError::NotFound { .. } | DataError::TargetNotFound(_) => StatusCode::NOT_FOUND,
        DataError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string()).into_response()
}

fn resolve_range(state: &AppState, code: Option<i64>) -> Result<TimeRange, Response> {
    TimeRange::from_code(code.unwrap_or(state.monitor.default_time_range)).map_err(error_response)
}

// ============================================================================
// API: Configuration
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ConfResponse {
    pub targets: Vec<Target>,
    pub observers: Vec<Observer>,
}

pub async fn handle_conf(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = check_token(&state, &headers) {
        return resp;
    }
    Json(ConfResponse {
        targets: state.registry.targets().map(|t| (**t).clone()).collect(),
        observers: state.registry.observers().map(|o| (**o).clone()).collect(),
    })
    .into_response()
}

// ============================================================================
// API: Data
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PutQuery {
    #[serde(alias = "t")]
    pub target: i64,
    #[serde(alias = "o")]
    pub observer: i64,
}

pub async fn handle_put_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PutQuery>,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(resp) = check_token(&state, &headers) {
        return resp;
    }

    let record: Record = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("unmarshal post data error: {}", e))
                .into_response()
        }
    };

    let result = state
        .persistence
        .try_write(|| state.registry.put(query.target, query.observer, record));

    match result {
        None => (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response(),
        Some(Ok(())) => StatusCode::OK.into_response(),
        Some(Err(e)) => {
            tracing::warn!(
                "Rejected record for target {} observer {}: {}",
                query.target,
                query.observer,
                e
            );
            error_response(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AbbrQuery {
    #[serde(alias = "t")]
    pub target: i64,
    #[serde(default, alias = "r")]
    pub range: Option<i64>,
}

pub async fn handle_abbr_data(
    State(state): State<AppState>,
    Query(query): Query<AbbrQuery>,
) -> impl IntoResponse {
    let range = match resolve_range(&state, query.range) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match state.registry.abbr_data(query.target, range) {
        Ok(data) => Json(data).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FullQuery {
    #[serde(alias = "t")]
    pub target: i64,
    #[serde(alias = "o")]
    pub observer: i64,
    #[serde(default, alias = "r")]
    pub range: Option<i64>,
}

pub async fn handle_full_data(
    State(state): State<AppState>,
    Query(query): Query<FullQuery>,
) -> impl IntoResponse {
    let range = match resolve_range(&state, query.range) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match state.registry.full_data(query.target, query.observer, range) {
        Ok(data) => Json(data).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatQuery {
    #[serde(alias = "t")]
    pub target: i64,
    #[serde(default, alias = "i")]
    pub interval: Option<i64>,
}

pub async fn handle_stat_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatQuery>,
) -> impl IntoResponse {
    if let Err(resp) = check_token(&state, &headers) {
        return resp;
    }

    let interval = query.interval.unwrap_or(state.monitor.default_interval);
    match state.registry.stat_data(query.target, interval) {
        Ok(data) => Json(data).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: Lifecycle,
    pub pairs: usize,
    pub records: usize,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        state: state.persistence.state(),
        pairs: state.registry.len(),
        records: state.registry.record_count(),
    })
}
