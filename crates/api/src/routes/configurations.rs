use axum::routing::get;
use axum::Router;

use crate::handlers::configurations;
use crate::state::AppState;

/// Stored configuration routes mounted at `/configurations`.
///
/// ```text
/// GET    /        list stored configuration ids
/// PUT    /{id}    store (or replace) a configuration
/// GET    /{id}    fetch a stored configuration
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(configurations::list_configurations))
        .route(
            "/{id}",
            get(configurations::get_configuration).put(configurations::put_configuration),
        )
}
