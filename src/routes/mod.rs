use std::path::Path;

use axum::Router;

use crate::state::SharedState;

pub mod debug;
pub mod docs;
pub mod health;
pub mod web_app;
pub mod websocket;

/// Compose all route trees and attach the shared state.
///
/// When `static_dir` is set, the web app answers every path the API does not claim.
pub fn router(state: SharedState, static_dir: Option<&Path>) -> Router<()> {
    let api = health::router()
        .merge(debug::router())
        .merge(websocket::router())
        .merge(docs::router());

    let app = match static_dir {
        Some(dir) => api.merge(web_app::router(dir)),
        None => api,
    };
    app.with_state(state)
}
