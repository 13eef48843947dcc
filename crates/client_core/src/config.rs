use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use integrations::{DeviceStoreConfig, InterpreterConfig};
use serde::{Deserialize, Serialize};

use crate::scan::DEFAULT_EXPECTED_PAYLOAD;

/// Client settings, layered as defaults < `voiceops.toml` < `VOICEOPS__*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,
    pub database_url: String,
    pub cookie_jar_path: String,
    pub device_store_url: String,
    pub device_store_suffix: String,
    pub interpreter_url: String,
    pub request_timeout_secs: u64,
    pub frame_interval_ms: u64,
    pub pulse_secs: u64,
    pub expected_payload: String,
    pub speak_responses: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            database_url: "sqlite://./data/voiceops.db".into(),
            cookie_jar_path: "./data/cookies.json".into(),
            device_store_url: "http://127.0.0.1:9000".into(),
            device_store_suffix: ".json".into(),
            interpreter_url: "http://127.0.0.1:5001".into(),
            request_timeout_secs: 10,
            frame_interval_ms: 100,
            pulse_secs: 10,
            expected_payload: DEFAULT_EXPECTED_PAYLOAD.into(),
            speak_responses: true,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_secs(self.pulse_secs)
    }

    pub fn device_store(&self) -> DeviceStoreConfig {
        DeviceStoreConfig {
            base_url: self.device_store_url.clone(),
            path_suffix: self.device_store_suffix.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn interpreter(&self) -> InterpreterConfig {
        InterpreterConfig {
            base_url: self.interpreter_url.clone(),
            request_timeout: self.request_timeout(),
        }
    }
}

/// Loads settings. `file` overrides the default `voiceops.toml` lookup and
/// must exist when given.
pub fn load_settings(file: Option<&Path>) -> Result<ClientSettings> {
    let file_source = match file {
        Some(path) => File::from(path).required(true),
        None => File::with_name("voiceops").required(false),
    };
    Config::builder()
        .add_source(Config::try_from(&ClientSettings::default())?)
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("VOICEOPS")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to assemble client configuration")?
        .try_deserialize()
        .context("invalid client configuration")
}

/// Accepts bare paths as well as sqlite URLs.
pub fn normalize_database_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return ClientSettings::default().database_url;
    }
    if raw.starts_with("sqlite:") || raw.contains("://") {
        return raw.to_string();
    }
    format!("sqlite://{}", raw.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
