//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{any, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/list", get(handlers::list_children))
        // get() also matches HEAD
        .route("/download", get(handlers::download))
        .route("/upload", post(handlers::upload))
        .route("/delete", post(handlers::delete_node))
        .route("/folder", post(handlers::create_folder))
        .route("/move", post(handlers::move_node))
        .route("/rename", post(handlers::rename_node))
        .route("/copy", post(handlers::copy_node));

    // WebDAV methods (PROPFIND, MKCOL, COPY, MOVE) are not standard method
    // routes; dispatch every method to one handler.
    let webdav_routes = Router::new()
        .route("/webdav", any(handlers::webdav_dispatch))
        // The catch-all below does not match an empty tail
        .route("/webdav/", any(handlers::webdav_dispatch))
        .route("/webdav/{*path}", any(handlers::webdav_dispatch));

    Router::new()
        .merge(api_routes)
        .merge(webdav_routes)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
