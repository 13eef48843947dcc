//! Glue between typed or spoken commands and the device dispatcher.

use std::{sync::Arc, time::Duration};

use integrations::{clamp_listen_duration, CommandInterpreter};
use shared::{
    domain::DeviceId,
    protocol::{DeviceAction, VoiceCommandResponse},
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    dispatcher::{DeviceDispatcher, DEFAULT_PULSE_DURATION},
    error::{ClientError, ClientResult},
    health::HealthProbe,
};

pub const EMERGENCY_FAILED_MESSAGE: &str = "Failed to trigger emergency alert";

pub struct CommandConsole {
    interpreter: Arc<dyn CommandInterpreter>,
    dispatcher: Arc<DeviceDispatcher>,
    health: Arc<HealthProbe>,
    emergency_device: DeviceId,
    pulse_duration: Duration,
    speak_responses: bool,
}

impl CommandConsole {
    pub fn new(
        interpreter: Arc<dyn CommandInterpreter>,
        dispatcher: Arc<DeviceDispatcher>,
        health: Arc<HealthProbe>,
    ) -> Self {
        Self {
            interpreter,
            dispatcher,
            health,
            emergency_device: DeviceId::from("buzzer"),
            pulse_duration: DEFAULT_PULSE_DURATION,
            speak_responses: true,
        }
    }

    pub fn with_pulse_duration(mut self, pulse_duration: Duration) -> Self {
        self.pulse_duration = pulse_duration;
        self
    }

    pub fn with_speech(mut self, speak_responses: bool) -> Self {
        self.speak_responses = speak_responses;
        self
    }

    /// Blank input is ignored and yields `None`.
    pub async fn submit_text(&self, text: &str) -> Option<VoiceCommandResponse> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let response = match self
            .interpreter
            .process_text(text, self.speak_responses)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "text command failed");
                VoiceCommandResponse::failed(error.to_string())
            }
        };
        self.fold(&response).await;
        Some(response)
    }

    pub async fn listen(&self, seconds: u64) -> ClientResult<VoiceCommandResponse> {
        if !self.health.voice_enabled() {
            return Err(ClientError::InterpreterUnavailable);
        }
        let duration = clamp_listen_duration(seconds);
        info!(duration, "listening for voice command");
        let response = match self
            .interpreter
            .listen(duration, self.speak_responses)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "voice command failed");
                VoiceCommandResponse::failed(error.to_string())
            }
        };
        self.fold(&response).await;
        Ok(response)
    }

    /// Asks the interpreter service to drive a device directly.
    pub async fn control_device(&self, device: &str, command: &str) -> VoiceCommandResponse {
        let action = DeviceAction::new(device, command);
        let response = match self.interpreter.control_device(&action).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%device, %error, "interpreter device control failed");
                VoiceCommandResponse::failed(error.to_string())
            }
        };
        self.fold(&response).await;
        response
    }

    /// Pulses the buzzer and returns the confirmation text.
    pub async fn emergency(&self) -> ClientResult<String> {
        let (message, _shutoff) = self.emergency_pulse().await?;
        Ok(message)
    }

    /// Like [`Self::emergency`], also handing back the task that performs the
    /// deferred off write. Short-lived callers await it before exiting.
    pub async fn emergency_pulse(&self) -> ClientResult<(String, JoinHandle<()>)> {
        let shutoff = self
            .dispatcher
            .pulse(&self.emergency_device, self.pulse_duration)
            .await?;
        let message = format!(
            "Emergency buzzer triggered for {} seconds!",
            self.pulse_duration.as_secs()
        );
        Ok((message, shutoff))
    }

    async fn fold(&self, response: &VoiceCommandResponse) {
        for (device, outcome) in self.dispatcher.apply_command_result(response).await {
            if let Err(error) = outcome {
                warn!(%device, %error, "command action did not apply");
            }
        }
    }
}

pub fn format_response(response: &VoiceCommandResponse) -> String {
    if !response.success {
        return response
            .error
            .clone()
            .unwrap_or_else(|| "Command failed".to_string());
    }
    if let Some(text) = response.response.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    let actions = response.actions();
    if !actions.is_empty() {
        let executed: Vec<String> = actions
            .iter()
            .map(|action| format!("{} {}", action.device, action.command))
            .collect();
        return format!("Executed: {}", executed.join(", "));
    }
    "Command processed successfully".to_string()
}

pub fn intent_display_name(intent: Option<&str>) -> &'static str {
    match intent {
        Some("device_control") => "Device Control",
        Some("sensor_query") => "Sensor Query",
        Some("emergency") => "Emergency",
        Some("password_access") => "Access Control",
        Some("general_chat") => "General Chat",
        Some("unknown") => "Unknown Command",
        _ => "Processing...",
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
