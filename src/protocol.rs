//! Message protocol between the control surface, the session coordinator,
//! and the processing host.
//!
//! The control-surface leg is a serde-tagged wire format; every request
//! receives exactly one terminal response. The coordinator↔host leg runs
//! over in-process channels, so those messages are plain enums carrying
//! the stream handle and a oneshot responder.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::capture::{StreamHandle, TabId};
use crate::error::CaptureError;
use crate::settings::{EffectsUpdate, SettingsUpdate};

/// Commands issued by the control surface, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Begin capturing. With no explicit tab the coordinator targets the
    /// currently active tab.
    #[serde(rename = "START_AUDIO_CAPTURE")]
    StartAudioCapture {
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    #[serde(rename = "STOP_AUDIO_CAPTURE")]
    StopAudioCapture,
    #[serde(rename = "UPDATE_SETTINGS")]
    UpdateSettings {
        #[serde(flatten)]
        settings: SettingsUpdate,
    },
    #[serde(rename = "UPDATE_EFFECTS")]
    UpdateEffects {
        #[serde(flatten)]
        effects: EffectsUpdate,
    },
    #[serde(rename = "GET_STATUS")]
    GetStatus,
    #[serde(rename = "GET_ANALYSER_DATA")]
    GetAnalyserData,
}

/// Terminal responses to [`ControlMessage`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Status(StatusResponse),
    Start(StartResponse),
    Analyser(AnalyserResponse),
    Ack(AckResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "tabId")]
    pub tab_id: Option<TabId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        ControlResponse::Ack(AckResponse {
            success: true,
            error: None,
        })
    }

    pub fn error(err: &CaptureError) -> Self {
        ControlResponse::Ack(AckResponse {
            success: false,
            error: Some(err.to_string()),
        })
    }

    pub fn started(tab_id: TabId) -> Self {
        ControlResponse::Start(StartResponse {
            success: true,
            tab_id: Some(tab_id),
            error: None,
        })
    }

    pub fn start_failed(err: &CaptureError) -> Self {
        ControlResponse::Start(StartResponse {
            success: false,
            tab_id: None,
            error: Some(err.to_string()),
        })
    }
}

/// A control request paired with its response channel.
#[derive(Debug)]
pub struct ControlRequest {
    pub message: ControlMessage,
    pub respond_to: oneshot::Sender<ControlResponse>,
}

/// Commands the coordinator sends to the processing host. The in-process
/// rendering of `INIT_AUDIO_CONTEXT` and `STOP_AUDIO_PROCESSING`.
#[derive(Debug)]
pub enum HostCommand {
    /// Hand off a freshly acquired stream and build the graph.
    Initialize {
        stream: StreamHandle,
        respond_to: oneshot::Sender<Result<(), CaptureError>>,
    },
    /// Tear down the graph and release the stream. Always succeeds.
    Teardown {
        notify: bool,
        respond_to: oneshot::Sender<()>,
    },
    ApplySettings(SettingsUpdate),
    ApplyEffects(EffectsUpdate),
    /// One-shot read of the analysis tap.
    AnalyserSnapshot {
        respond_to: oneshot::Sender<Result<Vec<u8>, CaptureError>>,
    },
}

/// Notifications the host sends back: `AUDIO_STARTED`, `AUDIO_STOPPED`,
/// `AUDIO_ERROR`.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Started { tab_id: TabId },
    Stopped { tab_id: Option<TabId> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_use_spec_discriminators() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"START_AUDIO_CAPTURE"}"#).unwrap();
        assert_eq!(msg, ControlMessage::StartAudioCapture { tab_id: None });

        let msg: ControlMessage = serde_json::from_str(
            r#"{"type":"UPDATE_SETTINGS","volume":150,"bands":{"1k":5}}"#,
        )
        .unwrap();
        match msg {
            ControlMessage::UpdateSettings { settings } => {
                assert_eq!(settings.volume, Some(150.0));
                assert_eq!(settings.bands.unwrap().get("1k"), Some(&5.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ControlMessage = serde_json::from_str(
            r#"{"type":"UPDATE_EFFECTS","spatial":{"enabled":true,"mode":"7d","width":80}}"#,
        )
        .unwrap();
        match msg {
            ControlMessage::UpdateEffects { effects } => {
                let spatial = effects.spatial.unwrap();
                assert!(spatial.enabled);
                assert_eq!(spatial.width, 80.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn responses_serialize_with_wire_field_names() {
        let json = serde_json::to_string(&ControlResponse::started(7)).unwrap();
        assert_eq!(json, r#"{"success":true,"tabId":7}"#);

        let json = serde_json::to_string(&ControlResponse::Status(StatusResponse {
            is_active: false,
            tab_id: None,
        }))
        .unwrap();
        assert_eq!(json, r#"{"isActive":false,"tabId":null}"#);

        let json =
            serde_json::to_string(&ControlResponse::error(&CaptureError::Throttled)).unwrap();
        assert!(json.contains(r#""success":false"#));
        assert!(json.contains("throttled"));
    }
}
