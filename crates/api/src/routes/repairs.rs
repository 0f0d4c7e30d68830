use axum::routing::{get, post};
use axum::Router;

use crate::handlers::repairs;
use crate::state::AppState;

/// Repair routes mounted at `/repairs`.
///
/// ```text
/// GET    /                              list parked repair records
/// POST   /{run_id}/{case_id}/resubmit   requeue a parked case
/// POST   /{run_id}/{case_id}/fail       record a parked case as failed
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(repairs::list_repairs))
        .route("/{run_id}/{case_id}/resubmit", post(repairs::resubmit_repair))
        .route("/{run_id}/{case_id}/fail", post(repairs::fail_repair))
}
