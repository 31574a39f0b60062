use serde::Serialize;
use utoipa::ToSchema;

use crate::{dao::race_store::StoreInfo, dto::format_system_time};

/// Number of WebSocket clients currently registered.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientsResponse {
    pub connected_clients: usize,
}

/// Outcome of a forced save.
#[derive(Debug, Serialize, ToSchema)]
pub struct SaveResponse {
    pub success: bool,
    pub message: String,
}

impl SaveResponse {
    pub fn saved() -> Self {
        Self {
            success: true,
            message: "race state saved".into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Metadata about the persisted race document.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataFileResponse {
    pub exists: bool,
    /// Size in bytes, when the document exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// RFC 3339 timestamp of the last write, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub path: String,
}

impl From<StoreInfo> for DataFileResponse {
    fn from(info: StoreInfo) -> Self {
        Self {
            exists: info.exists,
            size: info.size_bytes,
            last_modified: info.last_modified.map(format_system_time),
            path: info.location,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;

    use super::*;

    #[test]
    fn data_file_omits_unknown_metadata() {
        let payload = DataFileResponse::from(StoreInfo {
            location: "race_data.json".into(),
            exists: false,
            size_bytes: None,
            last_modified: None,
        });
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({"exists": false, "path": "race_data.json"})
        );
    }

    #[test]
    fn data_file_formats_modification_time() {
        let payload = DataFileResponse::from(StoreInfo {
            location: "race_data.json".into(),
            exists: true,
            size_bytes: Some(42),
            last_modified: Some(SystemTime::UNIX_EPOCH),
        });
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({
                "exists": true,
                "size": 42,
                "lastModified": "1970-01-01T00:00:00Z",
                "path": "race_data.json"
            })
        );
    }

    #[test]
    fn clients_use_camel_case() {
        let payload = ClientsResponse {
            connected_clients: 3,
        };
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({"connectedClients": 3})
        );
    }
}
