use serde::{Deserialize, Serialize};
use serde_json::Value;

use layersync_core::types::{ClientId, ObjectId, StreamId};

use crate::error::RuntimeError;

/// One host UI action, sent as a newline-delimited JSON object tagged by
/// `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum HostCommand {
    /// Create a stream, register as its sender and track `objects`.
    AddSender {
        name: String,
        #[serde(default)]
        objects: Vec<ObjectId>,
    },
    AddReceiver {
        stream_id: StreamId,
    },
    RemoveClient {
        client_id: ClientId,
        #[serde(default)]
        delete: bool,
    },
    ForceUpdate {
        client_id: ClientId,
    },
    TogglePaused {
        client_id: ClientId,
        paused: bool,
    },
    ToggleVisibility {
        client_id: ClientId,
        visible: bool,
    },
    ToggleLayerHover {
        client_id: ClientId,
        layer_id: String,
        on: bool,
    },
    ToggleLayerVisibility {
        client_id: ClientId,
        layer_id: String,
        visible: bool,
    },
    Bake {
        client_id: ClientId,
    },
    BakeLayer {
        client_id: ClientId,
        layer_id: String,
    },
    AddObjects {
        client_id: ClientId,
        objects: Vec<ObjectId>,
    },
    RemoveObjects {
        client_id: ClientId,
        objects: Vec<ObjectId>,
    },
    ListClients,
}

impl HostCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::AddSender { .. } => "add-sender",
            HostCommand::AddReceiver { .. } => "add-receiver",
            HostCommand::RemoveClient { .. } => "remove-client",
            HostCommand::ForceUpdate { .. } => "force-update",
            HostCommand::TogglePaused { .. } => "toggle-paused",
            HostCommand::ToggleVisibility { .. } => "toggle-visibility",
            HostCommand::ToggleLayerHover { .. } => "toggle-layer-hover",
            HostCommand::ToggleLayerVisibility { .. } => "toggle-layer-visibility",
            HostCommand::Bake { .. } => "bake",
            HostCommand::BakeLayer { .. } => "bake-layer",
            HostCommand::AddObjects { .. } => "add-objects",
            HostCommand::RemoveObjects { .. } => "remove-objects",
            HostCommand::ListClients => "list-clients",
        }
    }

    /// Parse one request line.
    pub fn from_line(line: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Serialize as one line, newline included.
    pub fn to_line(&self) -> Result<String, RuntimeError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl From<Result<Value, RuntimeError>> for HostResponse {
    fn from(result: Result<Value, RuntimeError>) -> Self {
        match result {
            Ok(data) => HostResponse::ok(data),
            Err(err) => HostResponse::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_parse_from_kebab_case_tags() {
        let cmd = HostCommand::from_line(r#"{"cmd":"add-sender","name":"Walls"}"#).expect("parse");
        assert_eq!(
            cmd,
            HostCommand::AddSender {
                name: "Walls".to_string(),
                objects: Vec::new(),
            }
        );

        let cmd = HostCommand::from_line(
            r#"{"cmd":"toggle-layer-hover","client_id":"receiver-0001","layer_id":"g-1","on":true}"#,
        )
        .expect("parse");
        assert_eq!(cmd.name(), "toggle-layer-hover");

        let cmd = HostCommand::from_line("  {\"cmd\":\"list-clients\"}\n").expect("parse");
        assert_eq!(cmd, HostCommand::ListClients);
    }

    #[test]
    fn remove_client_defaults_to_keeping_tags() {
        let cmd = HostCommand::from_line(r#"{"cmd":"remove-client","client_id":"sender-0001"}"#)
            .expect("parse");
        assert_eq!(
            cmd,
            HostCommand::RemoveClient {
                client_id: ClientId::from("sender-0001"),
                delete: false,
            }
        );
    }

    #[test]
    fn unknown_command_is_a_json_error() {
        let err = HostCommand::from_line(r#"{"cmd":"explode"}"#).expect_err("unknown");
        assert!(matches!(err, RuntimeError::Json(_)));
    }

    #[test]
    fn response_lines_omit_empty_fields() {
        let line = HostResponse::ok(json!({ "n": 1 })).to_line().expect("encode");
        assert_eq!(line, "{\"ok\":true,\"data\":{\"n\":1}}\n");

        let failed: HostResponse = Err(RuntimeError::Protocol("nope".to_string())).into();
        assert_eq!(
            serde_json::to_value(&failed).expect("value"),
            json!({ "ok": false, "error": "protocol error: nope" })
        );
    }
}
