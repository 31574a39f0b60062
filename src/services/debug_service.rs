use std::sync::Arc;

use tracing::warn;

use crate::{
    dto::debug::{ClientsResponse, DataFileResponse, SaveResponse},
    error::ServiceError,
    services::coordinator,
    state::{SharedState, race::RaceState},
};

/// Current race state, exactly as broadcast to clients.
pub async fn current_state(state: &SharedState) -> Arc<RaceState> {
    state.snapshot().await
}

/// Number of connected WebSocket clients.
pub fn connected_clients(state: &SharedState) -> ClientsResponse {
    ClientsResponse {
        connected_clients: state.sessions().len(),
    }
}

/// Write the current state now. A failed write is reported in the payload, not as an error.
pub async fn force_save(state: &SharedState) -> SaveResponse {
    match coordinator::flush(state).await {
        Ok(()) => SaveResponse::saved(),
        Err(err) => {
            warn!(error = %err, "forced save failed");
            let detail = match &err {
                ServiceError::Unavailable(source) => source.to_string(),
                other => other.to_string(),
            };
            SaveResponse::failed(detail)
        }
    }
}

/// Metadata about the persisted document.
pub async fn data_file(state: &SharedState) -> Result<DataFileResponse, ServiceError> {
    let info = state.store().describe().await?;
    Ok(info.into())
}
