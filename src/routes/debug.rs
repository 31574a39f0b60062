use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use crate::{
    dto::debug::{ClientsResponse, DataFileResponse, SaveResponse},
    error::AppError,
    services::debug_service,
    state::{SharedState, race::RaceState},
};

/// Read-only status endpoints plus a manual save trigger.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/clients", get(get_clients))
        .route("/api/save", post(save))
        .route("/api/data-file", get(get_data_file))
}

#[utoipa::path(
    get,
    path = "/api/state",
    tag = "debug",
    responses((status = 200, description = "Full race state", body = RaceState))
)]
/// Return the full race state.
pub async fn get_state(State(state): State<SharedState>) -> Json<RaceState> {
    let snapshot = debug_service::current_state(&state).await;
    Json((*snapshot).clone())
}

#[utoipa::path(
    get,
    path = "/api/clients",
    tag = "debug",
    responses((status = 200, description = "Connected WebSocket clients", body = ClientsResponse))
)]
/// Return how many WebSocket clients are connected.
pub async fn get_clients(State(state): State<SharedState>) -> Json<ClientsResponse> {
    Json(debug_service::connected_clients(&state))
}

#[utoipa::path(
    post,
    path = "/api/save",
    tag = "debug",
    responses((status = 200, description = "Outcome of the forced save", body = SaveResponse))
)]
/// Persist the current state immediately.
pub async fn save(State(state): State<SharedState>) -> Json<SaveResponse> {
    Json(debug_service::force_save(&state).await)
}

#[utoipa::path(
    get,
    path = "/api/data-file",
    tag = "debug",
    responses(
        (status = 200, description = "Persisted document metadata", body = DataFileResponse),
        (status = 503, description = "Storage could not be inspected")
    )
)]
/// Describe the persisted race document.
pub async fn get_data_file(
    State(state): State<SharedState>,
) -> Result<Json<DataFileResponse>, AppError> {
    let payload = debug_service::data_file(&state).await?;
    Ok(Json(payload))
}
