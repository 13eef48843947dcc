use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use shared::domain::Identity;

#[derive(Debug, Clone)]
pub struct SessionTokenConfig {
    pub issuer: String,
    pub secret: String,
    pub ttl_seconds: i64,
}

impl Default for SessionTokenConfig {
    fn default() -> Self {
        Self {
            issuer: "voiceops".into(),
            secret: "devsecret".into(),
            ttl_seconds: shared::transport::SESSION_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    name: String,
    kind: String,
    iat: i64,
    exp: i64,
}

/// Signs an HS256 session token for `identity`. Returns the token and its
/// expiry instant.
pub fn mint_session_token(
    cfg: &SessionTokenConfig,
    identity: &Identity,
) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expires_at = now + Duration::seconds(cfg.ttl_seconds);
    let claims = Claims {
        iss: cfg.issuer.clone(),
        sub: format!("user:{}", identity.id),
        name: identity.display_name.clone(),
        kind: identity.kind.clone(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )?;
    Ok((token, expires_at))
}

#[cfg(test)]
#[path = "tests/token_tests.rs"]
mod tests;
