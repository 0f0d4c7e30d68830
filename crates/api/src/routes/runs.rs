use axum::routing::get;
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Run routes mounted at `/runs`.
///
/// ```text
/// POST   /              start a run (202)
/// GET    /              list run snapshots
/// DELETE /              delete every run entry
/// GET    /{id}          poll a run
/// DELETE /{id}          delete a run entry
/// GET    /{id}/input    configuration the run was started with
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(runs::list_runs)
                .post(runs::start_run)
                .delete(runs::delete_all_runs),
        )
        .route("/{id}", get(runs::poll_run).delete(runs::delete_run))
        .route("/{id}/input", get(runs::get_run_input))
}
