use std::{path::Path, time::Duration};

use anyhow::Context;
use ::config::{Config, Environment, File};
use integrations::DeviceStoreConfig;
use serde::{Deserialize, Serialize};
use server_api::{ScanCredential, SessionTokenConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub device_store_url: String,
    pub device_store_suffix: String,
    pub request_timeout_secs: u64,
    pub expected_payload: String,
    pub token_issuer: String,
    pub token_secret: String,
    pub token_ttl_seconds: i64,
    pub body_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let token = SessionTokenConfig::default();
        Self {
            bind_addr: "127.0.0.1:3000".into(),
            device_store_url: "http://127.0.0.1:9000".into(),
            device_store_suffix: ".json".into(),
            request_timeout_secs: 10,
            expected_payload: ScanCredential::default().payload,
            token_issuer: token.issuer,
            token_secret: token.secret,
            token_ttl_seconds: token.ttl_seconds,
            body_limit_bytes: 64 * 1024,
        }
    }
}

impl Settings {
    pub fn device_store(&self) -> DeviceStoreConfig {
        DeviceStoreConfig {
            base_url: self.device_store_url.clone(),
            path_suffix: self.device_store_suffix.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn credential(&self) -> ScanCredential {
        ScanCredential {
            payload: self.expected_payload.clone(),
            ..ScanCredential::default()
        }
    }

    pub fn token(&self) -> SessionTokenConfig {
        SessionTokenConfig {
            issuer: self.token_issuer.clone(),
            secret: self.token_secret.clone(),
            ttl_seconds: self.token_ttl_seconds,
        }
    }
}

/// Defaults, then `server.toml` (or `file`), then `APP__*` variables.
pub fn load_settings(file: Option<&Path>) -> anyhow::Result<Settings> {
    let file_source = match file {
        Some(path) => File::from(path).required(true),
        None => File::with_name("server").required(false),
    };
    Config::builder()
        .add_source(Config::try_from(&Settings::default())?)
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to assemble server configuration")?
        .try_deserialize()
        .context("invalid server configuration")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
