use axum::routing::get;
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;
use crate::ws;

/// Worker routes mounted at `/workers`.
///
/// ```text
/// GET    /      list connected workers
/// GET    /ws    worker WebSocket upgrade
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers))
        .route("/ws", get(ws::worker_ws_handler))
}
