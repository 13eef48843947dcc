use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{DeviceId, PowerState},
    protocol::AuditRecord,
};
use tracing::debug;
use url::Url;

/// Remote key-value store holding one `"on"`/`"off"` string per device.
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn read_state(&self, device: &DeviceId) -> Result<PowerState>;
    async fn write_state(&self, device: &DeviceId, state: PowerState) -> Result<()>;
    async fn append_log(&self, record: &AuditRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DeviceStoreConfig {
    pub base_url: String,
    /// Appended to every resource path; Firebase's REST API wants `.json`.
    pub path_suffix: String,
    pub request_timeout: Duration,
}

impl Default for DeviceStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".into(),
            path_suffix: ".json".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpDeviceStore {
    http: Client,
    base_url: Url,
    path_suffix: String,
}

impl HttpDeviceStore {
    pub fn new(config: DeviceStoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid device store url '{}'", config.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("device store url '{}' cannot carry a path", config.base_url);
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build device store http client")?;
        Ok(Self {
            http,
            base_url,
            path_suffix: config.path_suffix,
        })
    }

    fn resource_url(&self, collection: &str, name: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("device store url cannot carry a path"))?;
            segments.pop_if_empty();
            match name {
                Some(name) => {
                    segments.push(collection);
                    segments.push(&format!("{name}{}", self.path_suffix));
                }
                None => {
                    segments.push(&format!("{collection}{}", self.path_suffix));
                }
            }
        }
        Ok(url)
    }

    pub fn command_url(&self, device: &DeviceId) -> Result<Url> {
        self.resource_url("commands", Some(device.as_str()))
    }

    pub fn logs_url(&self) -> Result<Url> {
        self.resource_url("logs", None)
    }
}

#[async_trait]
impl DeviceStateStore for HttpDeviceStore {
    async fn read_state(&self, device: &DeviceId) -> Result<PowerState> {
        let url = self.command_url(device)?;
        let value: serde_json::Value = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to read state of {device}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("malformed state payload for {device}"))?;
        Ok(PowerState::from_stored(Some(&value)))
    }

    async fn write_state(&self, device: &DeviceId, state: PowerState) -> Result<()> {
        let url = self.command_url(device)?;
        debug!(%device, %state, %url, "writing device state");
        self.http
            .put(url)
            .json(&state.as_str())
            .send()
            .await
            .with_context(|| format!("failed to write state of {device}"))?
            .error_for_status()
            .with_context(|| format!("device store rejected write of {device}"))?;
        Ok(())
    }

    async fn append_log(&self, record: &AuditRecord) -> Result<()> {
        let url = self.logs_url()?;
        self.http
            .post(url)
            .json(record)
            .send()
            .await
            .context("failed to append audit log")?
            .error_for_status()
            .context("device store rejected audit log")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/device_store_tests.rs"]
mod tests;
