use serde::Serialize;
use utoipa::ToSchema;

/// Whether persistence is keeping up. Races keep running either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The race store answers.
    Ok,
    /// The race store cannot be reached; state lives in memory only.
    Degraded,
}

/// Payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
        }
    }

    pub fn degraded() -> Self {
        Self {
            status: HealthStatus::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthResponse::degraded()).unwrap(),
            r#"{"status":"degraded"}"#
        );
    }
}
