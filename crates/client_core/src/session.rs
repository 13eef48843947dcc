//! Client session kept in two places at once: a durable key-value record and
//! the cookie flag the route guard reads.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Identity, SessionRecord},
    transport::{login_cookies, logout_cookies, CookieJar, TransportSession},
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::error::{ClientError, ClientResult};

pub const TOKEN_KEY: &str = "voiceops_token";
pub const USER_KEY: &str = "voiceops_user";
pub const USER_ID_KEY: &str = "voiceops_user_id";
pub const USER_TYPE_KEY: &str = "voiceops_user_type";
pub const EXPIRES_AT_KEY: &str = "voiceops_expires_at";
pub const SESSION_KEYS: [&str; 5] = [
    TOKEN_KEY,
    USER_KEY,
    USER_ID_KEY,
    USER_TYPE_KEY,
    EXPIRES_AT_KEY,
];

/// Where logout sends the user.
pub const LANDING_PATH: &str = "/";
/// Where a login lands when no usable return path was given.
pub const HOME_PATH: &str = "/dashboard";

/// Page to open after login: the decoded `redirect` value the route guard
/// attached to the auth page, when it is a local path, else [`HOME_PATH`].
pub fn post_login_target(redirect: Option<&str>) -> String {
    let Some(raw) = redirect.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return HOME_PATH.to_string();
    };
    let decoded = form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(path, _)| path.into_owned())
        .unwrap_or_default();
    if decoded.starts_with('/') && !decoded.starts_with("//") && !decoded.contains('\\') {
        decoded
    } else {
        debug!(redirect = raw, "ignoring non-local return path");
        HOME_PATH.to_string()
    }
}

#[async_trait]
pub trait DurableSessionStore: Send + Sync {
    /// All-or-nothing write.
    async fn write_entries(&self, entries: &[(&str, &str)]) -> Result<()>;
    async fn read_entries(&self, keys: &[&str]) -> Result<HashMap<String, String>>;
    async fn clear_entries(&self, keys: &[&str]) -> Result<()>;
}

#[async_trait]
impl DurableSessionStore for Storage {
    async fn write_entries(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.put_values(entries).await
    }

    async fn read_entries(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        self.get_values(keys).await
    }

    async fn clear_entries(&self, keys: &[&str]) -> Result<()> {
        self.delete_values(keys).await.map(|_| ())
    }
}

/// Transport-visible half of the session.
#[async_trait]
pub trait TransportFlag: Send + Sync {
    /// Raises the flag for `identity`; it must lapse no later than `expires_at`.
    async fn set(&self, identity: &Identity, expires_at: DateTime<Utc>) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn current(&self) -> TransportSession;
    /// `Cookie` header to attach to outgoing requests.
    async fn cookie_header(&self) -> Option<String>;
}

/// Cookie jar, optionally mirrored to a JSON file so the flag survives a
/// restart like browser cookies do.
pub struct CookieTransport {
    jar: Mutex<CookieJar>,
    path: Option<PathBuf>,
}

impl CookieTransport {
    pub fn in_memory() -> Self {
        Self {
            jar: Mutex::new(CookieJar::new()),
            path: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jar = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt cookie jar '{}'", path.display()))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => CookieJar::new(),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read cookie jar '{}'", path.display()))
            }
        };
        Ok(Self {
            jar: Mutex::new(jar),
            path: Some(path),
        })
    }

    async fn apply(&self, cookies: Vec<String>, now: DateTime<Utc>) -> Result<()> {
        let mut jar = self.jar.lock().await;
        let mut next = jar.clone();
        for cookie in &cookies {
            next.apply_set_cookie(cookie, now);
        }
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create cookie directory '{}'", parent.display())
                })?;
            }
            let bytes = serde_json::to_vec_pretty(&next)?;
            tokio::fs::write(path, bytes)
                .await
                .with_context(|| format!("failed to persist cookie jar '{}'", path.display()))?;
        }
        *jar = next;
        Ok(())
    }
}

#[async_trait]
impl TransportFlag for CookieTransport {
    async fn set(&self, identity: &Identity, expires_at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        self.apply(login_cookies(identity, expires_at, now), now).await
    }

    async fn clear(&self) -> Result<()> {
        self.apply(logout_cookies(), Utc::now()).await
    }

    async fn current(&self) -> TransportSession {
        self.jar.lock().await.session(Utc::now())
    }

    async fn cookie_header(&self) -> Option<String> {
        self.jar.lock().await.header(Utc::now())
    }
}

pub struct SessionStore {
    durable: Arc<dyn DurableSessionStore>,
    transport: Arc<dyn TransportFlag>,
    current: Mutex<Option<SessionRecord>>,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn DurableSessionStore>, transport: Arc<dyn TransportFlag>) -> Self {
        Self {
            durable,
            transport,
            current: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn TransportFlag> {
        &self.transport
    }

    /// Durable write first, then the transport flag. If the flag cannot be set
    /// the durable record is removed again and no session exists.
    pub async fn login(
        &self,
        identity: Identity,
        token: String,
        expires_at: DateTime<Utc>,
    ) -> ClientResult<SessionRecord> {
        let mut current = self.current.lock().await;
        let record = SessionRecord {
            identity,
            issued_token: token,
            expires_at,
        };

        let expires_at = record.expires_at.to_rfc3339();
        let entries = [
            (TOKEN_KEY, record.issued_token.as_str()),
            (USER_KEY, record.identity.display_name.as_str()),
            (USER_ID_KEY, record.identity.id.as_str()),
            (USER_TYPE_KEY, record.identity.kind.as_str()),
            (EXPIRES_AT_KEY, expires_at.as_str()),
        ];
        self.durable
            .write_entries(&entries)
            .await
            .map_err(ClientError::Session)?;

        if let Err(error) = self
            .transport
            .set(&record.identity, record.expires_at)
            .await
        {
            warn!(%error, "transport flag write failed; undoing durable session");
            if let Err(rollback) = self.durable.clear_entries(&SESSION_KEYS).await {
                warn!(error = %rollback, "failed to undo durable session write");
            }
            return Err(ClientError::Session(error));
        }

        info!(user = %record.identity.display_name, "session established");
        *current = Some(record.clone());
        Ok(record)
    }

    /// Clears transport then durable state. Failures are logged; the in-memory
    /// session is gone either way and the landing path is returned.
    pub async fn logout(&self) -> &'static str {
        let mut current = self.current.lock().await;
        if let Err(error) = self.transport.clear().await {
            warn!(%error, "failed to clear transport flag");
        }
        if let Err(error) = self.durable.clear_entries(&SESSION_KEYS).await {
            warn!(%error, "failed to clear durable session");
        }
        if let Some(record) = current.take() {
            info!(user = %record.identity.display_name, "session ended");
        }
        LANDING_PATH
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.current_record().await.map(|record| record.identity)
    }

    pub async fn current_record(&self) -> Option<SessionRecord> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|record| !record.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Reloads the durable record. A complete unexpired record re-asserts the
    /// transport flag for its remaining lifetime; anything else clears both
    /// representations.
    pub async fn restore(&self) -> ClientResult<Option<Identity>> {
        let mut current = self.current.lock().await;
        let entries = self
            .durable
            .read_entries(&SESSION_KEYS)
            .await
            .map_err(ClientError::Session)?;

        match record_from_entries(&entries).filter(|r| !r.is_expired_at(Utc::now())) {
            Some(record) => {
                self.transport
                    .set(&record.identity, record.expires_at)
                    .await
                    .map_err(ClientError::Session)?;
                debug!(user = %record.identity.display_name, "session restored");
                let identity = record.identity.clone();
                *current = Some(record);
                Ok(Some(identity))
            }
            None => {
                if !entries.is_empty() {
                    info!("discarding incomplete or expired session record");
                }
                self.transport.clear().await.map_err(ClientError::Session)?;
                self.durable
                    .clear_entries(&SESSION_KEYS)
                    .await
                    .map_err(ClientError::Session)?;
                *current = None;
                Ok(None)
            }
        }
    }
}

fn record_from_entries(entries: &HashMap<String, String>) -> Option<SessionRecord> {
    let expires_at = DateTime::parse_from_rfc3339(entries.get(EXPIRES_AT_KEY)?)
        .ok()?
        .with_timezone(&Utc);
    let name = entries.get(USER_KEY).filter(|name| !name.is_empty())?;
    Some(SessionRecord {
        identity: Identity::new(
            entries.get(USER_ID_KEY)?.clone(),
            name.clone(),
            entries.get(USER_TYPE_KEY)?.clone(),
        ),
        issued_token: entries.get(TOKEN_KEY)?.clone(),
        expires_at,
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
