use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::validate_not_blank,
    state::race::{RaceId, RaceState, RiderId},
};

// A field that must be present but may be `null`.
fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::deserialize(deserializer)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
/// Commands accepted from operator clients over the WebSocket.
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    CreateRace {
        name: String,
    },
    SelectRace {
        /// Required; `null` clears the selection.
        #[serde(rename = "raceId", deserialize_with = "required_nullable")]
        #[schema(required = true, nullable)]
        race_id: Option<RaceId>,
    },
    RemoveRace {
        #[serde(rename = "raceId")]
        race_id: RaceId,
    },
    AddRider {
        number: String,
        name: String,
        #[serde(default)]
        class: Option<String>,
    },
    RemoveRider {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
    },
    AddLap {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
    },
    RemoveLap {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
    },
    StartRace,
    #[serde(alias = "stopRace")]
    FinishRace,
    ResetRace,
    SortRiders,
    AddClass {
        name: String,
    },
    RemoveClass {
        name: String,
    },
    AddPenalty {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
    },
    #[serde(other)]
    Unknown,
}

/// Reasons an inbound frame is dropped before reaching the coordinator.
#[derive(Debug, Error)]
pub enum InboundError {
    /// The frame is not a JSON command envelope.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The envelope parsed but required text fields are blank.
    #[error("invalid command: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ClientCommand {
    /// Decode and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let command: Self = serde_json::from_str(text)?;
        command.validate()?;
        Ok(command)
    }

    /// Wire name of the command, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRace { .. } => "createRace",
            Self::SelectRace { .. } => "selectRace",
            Self::RemoveRace { .. } => "removeRace",
            Self::AddRider { .. } => "addRider",
            Self::RemoveRider { .. } => "removeRider",
            Self::AddLap { .. } => "addLap",
            Self::RemoveLap { .. } => "removeLap",
            Self::StartRace => "startRace",
            Self::FinishRace => "finishRace",
            Self::ResetRace => "resetRace",
            Self::SortRiders => "sortRiders",
            Self::AddClass { .. } => "addClass",
            Self::RemoveClass { .. } => "removeClass",
            Self::AddPenalty { .. } => "addPenalty",
            Self::Unknown => "unknown",
        }
    }
}

impl Validate for ClientCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let required: Vec<(&'static str, &str)> = match self {
            Self::CreateRace { name } | Self::AddClass { name } | Self::RemoveClass { name } => {
                vec![("name", name.as_str())]
            }
            Self::AddRider { number, name, .. } => {
                vec![("number", number.as_str()), ("name", name.as_str())]
            }
            _ => Vec::new(),
        };

        for (field, value) in required {
            if let Err(e) = validate_not_blank(value) {
                errors.add(field, e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Serialize)]
/// Messages pushed to every client. Always the full state, never a delta.
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage<'a> {
    State(&'a RaceState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_commands_with_camel_case_fields() {
        let command = ClientCommand::from_json_str(r#"{"type":"addLap","riderId":"r1"}"#).unwrap();
        assert_eq!(
            command,
            ClientCommand::AddLap {
                rider_id: "r1".into()
            }
        );

        let command = ClientCommand::from_json_str(
            r#"{"type":"addRider","number":"12","name":"Smith","class":"Cross"}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            ClientCommand::AddRider {
                number: "12".into(),
                name: "Smith".into(),
                class: Some("Cross".into()),
            }
        );
    }

    #[test]
    fn select_race_accepts_null() {
        let command =
            ClientCommand::from_json_str(r#"{"type":"selectRace","raceId":null}"#).unwrap();
        assert_eq!(command, ClientCommand::SelectRace { race_id: None });
    }

    #[test]
    fn select_race_requires_the_race_id_field() {
        let outcome = ClientCommand::from_json_str(r#"{"type":"selectRace"}"#);
        assert!(matches!(outcome, Err(InboundError::Malformed(_))));

        let command =
            ClientCommand::from_json_str(r#"{"type":"selectRace","raceId":"r1"}"#).unwrap();
        assert_eq!(command, ClientCommand::SelectRace { race_id: Some("r1".into()) });
    }

    #[test]
    fn stop_race_is_an_alias_of_finish_race() {
        let command = ClientCommand::from_json_str(r#"{"type":"stopRace"}"#).unwrap();
        assert_eq!(command, ClientCommand::FinishRace);
    }

    #[test]
    fn unknown_types_decode_to_unknown() {
        let command = ClientCommand::from_json_str(r#"{"type":"teleport","x":1}"#).unwrap();
        assert_eq!(command, ClientCommand::Unknown);
    }

    #[test]
    fn malformed_and_blank_payloads_are_rejected() {
        assert!(matches!(
            ClientCommand::from_json_str("not json"),
            Err(InboundError::Malformed(_))
        ));
        assert!(matches!(
            ClientCommand::from_json_str(r#"{"type":"createRace"}"#),
            Err(InboundError::Malformed(_))
        ));
        assert!(matches!(
            ClientCommand::from_json_str(r#"{"type":"createRace","name":"  "}"#),
            Err(InboundError::Invalid(_))
        ));
        assert!(matches!(
            ClientCommand::from_json_str(r#"{"type":"addRider","number":"","name":"Doe"}"#),
            Err(InboundError::Invalid(_))
        ));
    }

    #[test]
    fn state_message_is_adjacently_tagged() {
        let state = RaceState::default();
        let value = serde_json::to_value(ServerMessage::State(&state)).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["data"]["races"], serde_json::json!([]));
    }
}
