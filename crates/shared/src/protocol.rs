use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeviceId, Identity, PowerState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAuthRequest {
    #[serde(rename = "qrData")]
    pub qr_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAuthResponse {
    pub success: bool,
    pub message: String,
    pub user: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeAccessRequest {
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeAccessResponse {
    pub success: bool,
    pub message: String,
    pub devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAction {
    pub device: DeviceId,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DeviceAction {
    pub fn new(device: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device: DeviceId(device.into()),
            command: command.into(),
            value: None,
        }
    }
}

pub type DeviceControlRequest = DeviceAction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateResponse {
    pub device: DeviceId,
    pub state: PowerState,
}

/// Structured result of the command interpreter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceCommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<DeviceAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VoiceCommandResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn actions(&self) -> &[DeviceAction] {
        self.actions.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantHealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    pub firebase_connected: bool,
    pub whisper_loaded: bool,
    pub tts_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCommandRequest {
    pub command: String,
    pub speak_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenRequest {
    pub duration: u8,
    pub speak_response: bool,
}

/// Entry appended to the remote store's `logs` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceId>,
    pub status: String,
}
