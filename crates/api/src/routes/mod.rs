pub mod configurations;
pub mod health;
pub mod repairs;
pub mod runs;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /runs                                   start, list, delete all
/// /runs/{id}                              poll, delete
/// /runs/{id}/input                        submitted configuration
///
/// /configurations                         list stored ids
/// /configurations/{id}                    store, fetch
///
/// /repairs                                parked repair records
/// /repairs/{run_id}/{case_id}/resubmit    requeue a parked case (POST)
/// /repairs/{run_id}/{case_id}/fail        record a parked case as failed (POST)
///
/// /workers                                connected workers
/// /workers/ws                             worker WebSocket (GET upgrade)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/runs", runs::router())
        .nest("/configurations", configurations::router())
        .nest("/repairs", repairs::router())
        .nest("/workers", workers::router())
}
