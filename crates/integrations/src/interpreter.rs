use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use shared::protocol::{
    AssistantHealthStatus, DeviceAction, DeviceControlResponse, ListenRequest,
    ProcessCommandRequest, VoiceCommandResponse,
};
use tracing::debug;

pub const MIN_LISTEN_SECS: u8 = 1;
pub const MAX_LISTEN_SECS: u8 = 10;

pub fn clamp_listen_duration(seconds: u64) -> u8 {
    seconds.clamp(u64::from(MIN_LISTEN_SECS), u64::from(MAX_LISTEN_SECS)) as u8
}

/// Natural-language command service. Treated as a black box that turns text
/// or audio into a structured action list.
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn health(&self) -> Result<AssistantHealthStatus>;
    async fn process_text(&self, command: &str, speak_response: bool)
        -> Result<VoiceCommandResponse>;
    async fn listen(&self, duration_secs: u8, speak_response: bool)
        -> Result<VoiceCommandResponse>;
    async fn control_device(&self, action: &DeviceAction) -> Result<VoiceCommandResponse>;
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5001".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpCommandInterpreter {
    http: Client,
    base_url: String,
}

impl HttpCommandInterpreter {
    pub fn new(config: InterpreterConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build interpreter http client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("interpreter request to {path} failed"))
    }
}

/// Reads a JSON body, turning a non-success status into an error that carries
/// the service's own `error` field when it sent one.
async fn decode_body<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("interpreter returned a malformed payload")?;
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed: {}", status.as_u16()));
        return Err(anyhow!(message));
    }
    serde_json::from_value(body).context("interpreter returned an unexpected payload")
}

#[async_trait]
impl CommandInterpreter for HttpCommandInterpreter {
    async fn health(&self) -> Result<AssistantHealthStatus> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("interpreter health request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Health check failed: {}", status.as_u16()));
        }
        response
            .json()
            .await
            .context("interpreter health payload was malformed")
    }

    async fn process_text(
        &self,
        command: &str,
        speak_response: bool,
    ) -> Result<VoiceCommandResponse> {
        let request = ProcessCommandRequest {
            command: command.trim().to_string(),
            speak_response,
        };
        debug!(command = %request.command, "submitting text command");
        decode_body(self.post_json("/api/voice/process", &request).await?).await
    }

    async fn listen(&self, duration_secs: u8, speak_response: bool) -> Result<VoiceCommandResponse> {
        let request = ListenRequest {
            duration: clamp_listen_duration(u64::from(duration_secs)),
            speak_response,
        };
        debug!(duration = request.duration, "requesting voice capture");
        decode_body(self.post_json("/api/voice/listen", &request).await?).await
    }

    async fn control_device(&self, action: &DeviceAction) -> Result<VoiceCommandResponse> {
        let response: DeviceControlResponse =
            decode_body(self.post_json("/api/devices/control", action).await?).await?;
        Ok(VoiceCommandResponse {
            success: response.success,
            command: Some(format!("{} {}", action.device, action.command)),
            intent: Some("device_control".to_string()),
            response: Some(format!("{} turned {}", action.device, action.command)),
            actions: Some(vec![action.clone()]),
            firebase_success: Some(response.success),
            timestamp: response.timestamp,
            error: None,
        })
    }
}

#[cfg(test)]
#[path = "tests/interpreter_tests.rs"]
mod tests;
