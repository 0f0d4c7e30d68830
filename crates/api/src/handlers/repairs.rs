//! Handlers for the manual repair path.
//!
//! Only populated when automatic repair is disabled; otherwise repair
//! records are resolved as soon as they are submitted.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use caseflow_core::types::CaseKey;

use crate::error::AppResult;
use crate::handlers::parse_run_id;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/repairs
pub async fn list_repairs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let records = state.coordinator.list_repairs().await;
    Ok(Json(DataResponse { data: records }))
}

/// POST /api/v1/repairs/{run_id}/{case_id}/resubmit
pub async fn resubmit_repair(
    State(state): State<AppState>,
    Path((run_id, case_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let key = CaseKey::new(parse_run_id(&run_id)?, case_id);
    state.coordinator.resubmit_repair(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/repairs/{run_id}/{case_id}/fail
pub async fn fail_repair(
    State(state): State<AppState>,
    Path((run_id, case_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let key = CaseKey::new(parse_run_id(&run_id)?, case_id);
    state.coordinator.fail_repair(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
