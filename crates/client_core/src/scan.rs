//! Scan-and-validate state machine driving a [`CaptureSession`].

use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use shared::{
    domain::{DeviceId, Identity},
    protocol::{ScanAuthRequest, ScanAuthResponse},
    transport::SESSION_MAX_AGE_SECS,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    capture::CaptureAdapter,
    error::{ClientError, ClientResult},
};

pub const DEFAULT_EXPECTED_PAYLOAD: &str = "http://en.m.wikipedia.org";
pub const INVALID_CODE_MESSAGE: &str = "Invalid QR code";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Capturing,
    Validating,
    /// Entered when a validation fails and left immediately for `Capturing`,
    /// so it is only observable through [`ScanEvent::StateChanged`].
    Rejected,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    StateChanged(ScanState),
    /// Transient; capture continues.
    Rejected { message: String },
    Authenticated { payload: String, identity: Identity },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Accepted,
    Rejected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAttempt {
    pub attempt_id: Uuid,
    pub raw_payload: String,
    pub decoded_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// What a successful validation hands to the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCredential {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub devices: Vec<DeviceId>,
    pub message: Option<String>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Authenticated {
        payload: String,
        credential: ValidatedCredential,
    },
    Cancelled,
    /// The camera stream ended before a code was accepted.
    FeedEnded,
    /// Another scan already holds the camera.
    AlreadyActive,
    /// The controller or the capture adapter has already produced a login.
    AlreadyAuthenticated,
}

#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// `Err(ClientError::ValidationMismatch)` for a wrong code; any other error
    /// is a transport failure.
    async fn validate(&self, payload: &str) -> ClientResult<ValidatedCredential>;
}

/// Literal comparison against a single known payload.
#[derive(Debug, Clone)]
pub struct ExpectedCredential {
    pub payload: String,
    pub identity: Identity,
}

impl Default for ExpectedCredential {
    fn default() -> Self {
        Self {
            payload: DEFAULT_EXPECTED_PAYLOAD.to_string(),
            identity: Identity::new("qr-user", "Mr. Raghavendra", "qr-authenticated"),
        }
    }
}

#[async_trait]
impl CredentialValidator for ExpectedCredential {
    async fn validate(&self, payload: &str) -> ClientResult<ValidatedCredential> {
        if payload != self.payload {
            return Err(ClientError::ValidationMismatch);
        }
        Ok(ValidatedCredential {
            identity: self.identity.clone(),
            token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(SESSION_MAX_AGE_SECS),
            devices: Vec::new(),
            message: None,
            warning: None,
        })
    }
}

/// Delegates the check to the server, which also opens the door on success.
pub struct RemoteCredentialValidator {
    http: Client,
    server_url: String,
}

impl RemoteCredentialValidator {
    pub fn new(http: Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CredentialValidator for RemoteCredentialValidator {
    async fn validate(&self, payload: &str) -> ClientResult<ValidatedCredential> {
        let response = self
            .http
            .post(format!("{}/api/auth", self.server_url))
            .json(&ScanAuthRequest {
                qr_data: payload.to_string(),
            })
            .send()
            .await
            .context("scan validation request failed")
            .map_err(ClientError::Remote)?;

        match response.status() {
            StatusCode::BAD_REQUEST => return Err(ClientError::ValidationMismatch),
            status if !status.is_success() => {
                return Err(ClientError::Remote(anyhow!(
                    "scan validation failed with status {status}"
                )))
            }
            _ => {}
        }

        let body: ScanAuthResponse = response
            .json()
            .await
            .context("malformed scan validation response")
            .map_err(ClientError::Remote)?;
        if let Some(warning) = &body.warning {
            warn!(%warning, "server accepted scan with a warning");
        }
        Ok(ValidatedCredential {
            identity: body.user,
            token: body.token,
            expires_at: body.expires_at,
            devices: body.devices,
            message: Some(body.message),
            warning: body.warning,
        })
    }
}

pub struct ScanController {
    validator: Arc<dyn CredentialValidator>,
    state: ScanState,
    last_attempt: Option<ScanAttempt>,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanController {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            validator,
            state: ScanState::Idle,
            last_attempt: None,
            events,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn last_attempt(&self) -> Option<&ScanAttempt> {
        self.last_attempt.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    fn transition(&mut self, next: ScanState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "scan state change");
            self.state = next;
            let _ = self.events.send(ScanEvent::StateChanged(next));
        }
    }

    pub fn on_acquired(&mut self) {
        if self.state == ScanState::Idle {
            self.transition(ScanState::Capturing);
        }
    }

    pub fn cancel(&mut self) {
        if self.state != ScanState::Authenticated {
            self.transition(ScanState::Idle);
        }
    }

    /// Starts validating `payload`. Returns `None` (payload dropped) unless the
    /// controller is capturing.
    pub fn begin_validation(&mut self, payload: String) -> Option<ScanAttempt> {
        if self.state != ScanState::Capturing {
            debug!(state = ?self.state, "dropping payload outside capture");
            return None;
        }
        self.transition(ScanState::Validating);
        let attempt = ScanAttempt {
            attempt_id: Uuid::new_v4(),
            raw_payload: payload,
            decoded_at: Utc::now(),
            outcome: AttemptOutcome::Pending,
        };
        self.last_attempt = Some(attempt.clone());
        Some(attempt)
    }

    /// Applies a validator result. Emits `Authenticated` at most once.
    pub fn finish_validation(
        &mut self,
        mut attempt: ScanAttempt,
        result: ClientResult<ValidatedCredential>,
    ) -> Option<ValidatedCredential> {
        if self.state != ScanState::Validating {
            return None;
        }
        let accepted = match result {
            Ok(credential) => {
                attempt.outcome = AttemptOutcome::Accepted;
                self.transition(ScanState::Authenticated);
                info!(
                    attempt = %attempt.attempt_id,
                    user = %credential.identity.display_name,
                    "scan authenticated"
                );
                let _ = self.events.send(ScanEvent::Authenticated {
                    payload: attempt.raw_payload.clone(),
                    identity: credential.identity.clone(),
                });
                Some(credential)
            }
            Err(ClientError::ValidationMismatch) => {
                info!(attempt = %attempt.attempt_id, "scanned code rejected");
                attempt.outcome = AttemptOutcome::Rejected;
                self.reject(INVALID_CODE_MESSAGE.to_string());
                None
            }
            Err(error) => {
                warn!(attempt = %attempt.attempt_id, %error, "scan validation failed");
                attempt.outcome = AttemptOutcome::Failed(error.to_string());
                self.reject(error.to_string());
                None
            }
        };
        self.last_attempt = Some(attempt);
        accepted
    }

    fn reject(&mut self, message: String) {
        self.transition(ScanState::Rejected);
        let _ = self.events.send(ScanEvent::Rejected { message });
        self.transition(ScanState::Capturing);
    }

    /// Runs one scan session to completion. Resolving `cancel` stops capture and
    /// returns the controller to idle; an in-flight validation is discarded.
    pub async fn run(
        &mut self,
        adapter: &CaptureAdapter,
        cancel: impl Future<Output = ()>,
    ) -> ClientResult<ScanOutcome> {
        if self.state == ScanState::Authenticated || adapter.has_authenticated() {
            debug!("scan already authenticated; not reopening the camera");
            return Ok(ScanOutcome::AlreadyAuthenticated);
        }
        let mut session = match adapter.acquire().await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(ScanOutcome::AlreadyActive),
            Err(error) => {
                self.transition(ScanState::Idle);
                return Err(error);
            }
        };
        // Another scan may have latched the adapter between the check and acquire.
        if adapter.has_authenticated() {
            session.release().await;
            return Ok(ScanOutcome::AlreadyAuthenticated);
        }
        self.on_acquired();

        let validator = self.validator.clone();
        tokio::pin!(cancel);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancel => None,
                payload = session.next_payload() => Some(payload),
            };
            let payload = match next {
                None => {
                    self.cancel();
                    session.release().await;
                    return Ok(ScanOutcome::Cancelled);
                }
                Some(None) => {
                    self.cancel();
                    session.release().await;
                    return Ok(ScanOutcome::FeedEnded);
                }
                Some(Some(payload)) => payload,
            };
            let Some(attempt) = self.begin_validation(payload) else {
                continue;
            };

            let result = tokio::select! {
                biased;
                result = validator.validate(&attempt.raw_payload) => Some(result),
                _ = &mut cancel => None,
            };
            let Some(result) = result else {
                self.cancel();
                session.release().await;
                return Ok(ScanOutcome::Cancelled);
            };

            let dropped = session.drain_pending();
            if dropped > 0 {
                debug!(dropped, "discarded payloads decoded during validation");
            }

            if let Some(credential) = self.finish_validation(attempt.clone(), result) {
                session.suppress();
                adapter.mark_authenticated();
                session.release().await;
                return Ok(ScanOutcome::Authenticated {
                    payload: attempt.raw_payload,
                    credential,
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/scan_tests.rs"]
mod tests;
