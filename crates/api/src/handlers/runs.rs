//! Handlers for the `/runs` resource: the submitter surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use caseflow_coordinator::RunSource;
use caseflow_core::run::RunConfiguration;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::handlers::parse_run_id;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /runs`: exactly one of an inline configuration or the id
/// of a stored one.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub configuration: Option<RunConfiguration>,
    #[serde(default)]
    pub configuration_id: Option<String>,
}

impl StartRunRequest {
    fn into_source(self) -> AppResult<RunSource> {
        match (self.configuration, self.configuration_id) {
            (Some(config), None) => Ok(RunSource::Inline(config)),
            (None, Some(id)) => Ok(RunSource::Stored(id)),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "Provide either 'configuration' or 'configuration_id', not both".into(),
            )),
            (None, None) => Err(AppError::BadRequest(
                "Missing 'configuration' or 'configuration_id'".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedCount {
    pub deleted: usize,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/runs
///
/// Fan the configuration out into cases and start tracking the run.
/// Returns 202 with the run id and the endpoint to poll.
pub async fn start_run(
    State(state): State<AppState>,
    Json(input): Json<StartRunRequest>,
) -> AppResult<impl IntoResponse> {
    let handle = state.coordinator.start(input.into_source()?).await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: handle })))
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// GET /api/v1/runs
pub async fn list_runs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let runs = state.coordinator.poll_all().await;
    Ok(Json(DataResponse { data: runs }))
}

/// GET /api/v1/runs/{id}
///
/// Status, progress counters and, once the run is terminal, its output.
pub async fn poll_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.coordinator.poll(parse_run_id(&id)?).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// GET /api/v1/runs/{id}/input
pub async fn get_run_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let input = state.coordinator.run_input(parse_run_id(&id)?).await?;
    Ok(Json(DataResponse { data: input }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/runs/{id}
///
/// Removes the status entry. Cases already dispatched keep running; their
/// results are discarded when they come back.
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.coordinator.delete(parse_run_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/runs
pub async fn delete_all_runs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let deleted = state.coordinator.delete_all().await;
    tracing::info!(deleted, "Deleted all run entries");
    Ok(Json(DataResponse {
        data: DeletedCount { deleted },
    }))
}
