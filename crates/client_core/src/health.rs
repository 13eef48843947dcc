use std::sync::Arc;

use integrations::CommandInterpreter;
use shared::protocol::AssistantHealthStatus;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
    Available(AssistantHealthStatus),
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }
}

/// One-shot liveness check of the command interpreter. No polling and no
/// retries; callers re-check when they want fresh data.
pub struct HealthProbe {
    interpreter: Arc<dyn CommandInterpreter>,
    last: watch::Sender<Option<Availability>>,
}

impl HealthProbe {
    pub fn new(interpreter: Arc<dyn CommandInterpreter>) -> Self {
        let (last, _) = watch::channel(None);
        Self { interpreter, last }
    }

    pub async fn check_availability(&self) -> Availability {
        let availability = match self.interpreter.health().await {
            Ok(status) => {
                info!(
                    status = %status.status,
                    whisper = status.whisper_loaded,
                    tts = status.tts_available,
                    "command interpreter reachable"
                );
                Availability::Available(status)
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "command interpreter unavailable");
                Availability::Unavailable {
                    reason: error.to_string(),
                }
            }
        };
        self.last.send_replace(Some(availability.clone()));
        availability
    }

    pub fn last(&self) -> Option<Availability> {
        self.last.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Availability>> {
        self.last.subscribe()
    }

    /// Voice and text commands are only offered after a successful probe.
    pub fn voice_enabled(&self) -> bool {
        self.last
            .borrow()
            .as_ref()
            .is_some_and(Availability::is_available)
    }
}

#[cfg(test)]
#[path = "tests/health_tests.rs"]
mod tests;
