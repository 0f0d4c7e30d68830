//! Handlers for stored run configurations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use caseflow_core::collaborators::ConfigurationStore;
use caseflow_core::run::RunConfiguration;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StoredConfiguration {
    pub id: String,
    pub replaced: bool,
}

/// GET /api/v1/configurations
pub async fn list_configurations(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let ids = state.configurations.ids().await;
    Ok(Json(DataResponse { data: ids }))
}

/// PUT /api/v1/configurations/{id}
///
/// Returns 201 when the id is new, 200 when an existing configuration was
/// replaced. Invalid configurations are rejected before they are stored.
pub async fn put_configuration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<RunConfiguration>,
) -> AppResult<impl IntoResponse> {
    let replaced = state.configurations.put(id.clone(), config).await?;
    tracing::info!(configuration_id = %id, replaced, "Configuration stored");

    let status = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(DataResponse {
            data: StoredConfiguration { id, replaced },
        }),
    ))
}

/// GET /api/v1/configurations/{id}
pub async fn get_configuration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let config = state.configurations.get_configuration(&id).await?;
    Ok(Json(DataResponse { data: config }))
}
