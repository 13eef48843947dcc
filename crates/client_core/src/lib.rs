//! Client side of VoiceOps: scan-to-login, the dual-persisted session and
//! optimistic device control.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use integrations::{CommandInterpreter, DeviceStateStore, HttpCommandInterpreter, HttpDeviceStore};
use reqwest::{header, redirect, Client};
use shared::domain::Identity;
use storage::Storage;
use tracing::info;

pub mod capture;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod scan;
pub mod session;

use crate::{
    capture::CaptureAdapter,
    config::{normalize_database_url, ClientSettings},
    console::CommandConsole,
    dispatcher::{DeviceDispatcher, DeviceRegistry},
    error::{ClientError, ClientResult},
    health::HealthProbe,
    scan::{ScanController, ScanOutcome},
    session::{CookieTransport, SessionStore},
};

/// Result of fetching a page through the route guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVisit {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

/// Everything a front end needs, wired from one settings value.
pub struct VoiceOpsClient {
    settings: ClientSettings,
    http: Client,
    session: Arc<SessionStore>,
    dispatcher: Arc<DeviceDispatcher>,
    health: Arc<HealthProbe>,
    console: CommandConsole,
}

impl VoiceOpsClient {
    pub async fn connect(settings: ClientSettings) -> Result<Self> {
        let storage = Storage::new(&normalize_database_url(&settings.database_url))
            .await
            .context("failed to open session database")?;
        let transport = CookieTransport::open(&settings.cookie_jar_path).await?;
        let store: Arc<dyn DeviceStateStore> =
            Arc::new(HttpDeviceStore::new(settings.device_store())?);
        let interpreter: Arc<dyn CommandInterpreter> =
            Arc::new(HttpCommandInterpreter::new(settings.interpreter())?);
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .redirect(redirect::Policy::none())
            .build()
            .context("failed to build http client")?;

        Ok(Self::from_parts(
            settings,
            http,
            Arc::new(SessionStore::new(Arc::new(storage), Arc::new(transport))),
            store,
            interpreter,
        ))
    }

    pub fn from_parts(
        settings: ClientSettings,
        http: Client,
        session: Arc<SessionStore>,
        store: Arc<dyn DeviceStateStore>,
        interpreter: Arc<dyn CommandInterpreter>,
    ) -> Self {
        let dispatcher = Arc::new(DeviceDispatcher::new(store, DeviceRegistry::default()));
        let health = Arc::new(HealthProbe::new(interpreter.clone()));
        let console = CommandConsole::new(interpreter, dispatcher.clone(), health.clone())
            .with_pulse_duration(settings.pulse_duration())
            .with_speech(settings.speak_responses);
        Self {
            settings,
            http,
            session,
            dispatcher,
            health,
            console,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn dispatcher(&self) -> &Arc<DeviceDispatcher> {
        &self.dispatcher
    }

    pub fn health(&self) -> &Arc<HealthProbe> {
        &self.health
    }

    pub fn console(&self) -> &CommandConsole {
        &self.console
    }

    /// Restores the persisted session, failing with `AuthRequired` when there
    /// is none.
    pub async fn require_session(&self) -> ClientResult<Identity> {
        self.session.restore().await?.ok_or(ClientError::AuthRequired)
    }

    /// Runs a scan on `controller` and, on success, establishes the session.
    /// Rejected codes reach the caller through [`ScanController::subscribe`].
    pub async fn scan_and_login(
        &self,
        controller: &mut ScanController,
        adapter: &CaptureAdapter,
        cancel: impl Future<Output = ()>,
    ) -> ClientResult<ScanOutcome> {
        let outcome = controller.run(adapter, cancel).await?;
        if let ScanOutcome::Authenticated { credential, .. } = &outcome {
            self.session
                .login(
                    credential.identity.clone(),
                    credential.token.clone(),
                    credential.expires_at,
                )
                .await?;
            info!(user = %credential.identity.display_name, "logged in by scan");
        }
        Ok(outcome)
    }

    /// Fetches `path` from the server carrying the session cookies, without
    /// following redirects.
    pub async fn visit(&self, path: &str) -> Result<PageVisit> {
        let url = format!(
            "{}/{}",
            self.settings.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut request = self.http.get(&url);
        if let Some(cookies) = self.session.transport().cookie_header().await {
            request = request.header(header::COOKIE, cookies);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Ok(PageVisit {
            status,
            location,
            body,
        })
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
