//! Fakes shared by the client_core unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use integrations::{CommandInterpreter, DeviceStateStore};
use shared::{
    domain::{DeviceId, PowerState},
    protocol::{AssistantHealthStatus, AuditRecord, DeviceAction, VoiceCommandResponse},
};

use crate::{
    capture::{CameraSource, CodeDecoder, Frame, FrameFeed},
    error::ClientResult,
};

/// Frame whose bytes are the payload itself; paired with [`Utf8Decoder`].
pub fn payload_frame(payload: &str) -> Frame {
    Frame {
        width: payload.len() as u32,
        height: 1,
        luma: payload.as_bytes().to_vec(),
    }
}

pub struct Utf8Decoder;

impl CodeDecoder for Utf8Decoder {
    fn decode(&self, frame: &Frame) -> Vec<String> {
        String::from_utf8(frame.luma.clone())
            .ok()
            .filter(|text| !text.is_empty())
            .into_iter()
            .collect()
    }
}

/// Shows a fixed list of payloads to the camera in a loop. An empty script
/// yields blank frames.
pub struct ScriptedCamera {
    payloads: Vec<String>,
}

impl ScriptedCamera {
    pub fn new(payloads: &[&str]) -> Self {
        Self {
            payloads: payloads.iter().map(|p| p.to_string()).collect(),
        }
    }
}

struct ScriptedFeed {
    payloads: Vec<String>,
    cursor: usize,
}

#[async_trait]
impl FrameFeed for ScriptedFeed {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.payloads.is_empty() {
            return Some(payload_frame(""));
        }
        let payload = &self.payloads[self.cursor % self.payloads.len()];
        self.cursor += 1;
        Some(payload_frame(payload))
    }

    async fn stop(&mut self) {}
}

#[async_trait]
impl CameraSource for ScriptedCamera {
    async fn open(&self) -> ClientResult<Box<dyn FrameFeed>> {
        Ok(Box::new(ScriptedFeed {
            payloads: self.payloads.clone(),
            cursor: 0,
        }))
    }
}

/// Device store that accepts every write and remembers it.
#[derive(Default)]
pub struct MemoryDeviceStore {
    pub writes: Mutex<Vec<(DeviceId, PowerState)>>,
}

#[async_trait]
impl DeviceStateStore for MemoryDeviceStore {
    async fn read_state(
        &self,
        device: &DeviceId,
    ) -> anyhow::Result<PowerState> {
        Ok(self
            .writes
            .lock()
            .expect("lock")
            .iter()
            .rev()
            .find(|(written, _)| written == device)
            .map(|(_, state)| *state)
            .unwrap_or_default())
    }

    async fn write_state(
        &self,
        device: &DeviceId,
        state: PowerState,
    ) -> anyhow::Result<()> {
        self.writes
            .lock()
            .expect("lock")
            .push((device.clone(), state));
        Ok(())
    }

    async fn append_log(&self, _record: &AuditRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Interpreter with canned answers. `healthy == false` fails every call.
pub struct FakeInterpreter {
    pub healthy: bool,
    pub reply: VoiceCommandResponse,
    pub listened: Mutex<Vec<u8>>,
}

impl FakeInterpreter {
    pub fn replying(reply: VoiceCommandResponse) -> Self {
        Self {
            healthy: true,
            reply,
            listened: Mutex::new(Vec::new()),
        }
    }

    pub fn down() -> Self {
        Self {
            healthy: false,
            ..Self::replying(Default::default())
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.healthy {
            Ok(())
        } else {
            anyhow::bail!("connection refused")
        }
    }
}

#[async_trait]
impl CommandInterpreter for FakeInterpreter {
    async fn health(&self) -> anyhow::Result<AssistantHealthStatus> {
        self.check()?;
        Ok(AssistantHealthStatus {
            status: "healthy".into(),
            service: "fake".into(),
            timestamp: "now".into(),
            firebase_connected: true,
            whisper_loaded: true,
            tts_available: true,
        })
    }

    async fn process_text(
        &self,
        _command: &str,
        _speak_response: bool,
    ) -> anyhow::Result<VoiceCommandResponse> {
        self.check()?;
        Ok(self.reply.clone())
    }

    async fn listen(
        &self,
        duration_secs: u8,
        _speak_response: bool,
    ) -> anyhow::Result<VoiceCommandResponse> {
        self.check()?;
        self.listened.lock().expect("lock").push(duration_secs);
        Ok(self.reply.clone())
    }

    async fn control_device(
        &self,
        action: &DeviceAction,
    ) -> anyhow::Result<VoiceCommandResponse> {
        self.check()?;
        Ok(VoiceCommandResponse {
            success: true,
            actions: Some(vec![action.clone()]),
            ..Default::default()
        })
    }
}
