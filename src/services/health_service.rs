use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report `ok` while the race store can be inspected, `degraded` otherwise.
///
/// A degraded store does not stop the race: the in-memory state keeps serving clients.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.store().describe().await {
        Ok(_) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded()
        }
    }
}
