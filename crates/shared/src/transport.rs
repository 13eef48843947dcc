//! Cookie representation of the session, the only part of it the route guard
//! can see.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::domain::Identity;

pub const AUTH_COOKIE: &str = "voiceops_auth";
pub const USER_COOKIE: &str = "voiceops_user";
pub const USER_TYPE_COOKIE: &str = "voiceops_user_type";
pub const SESSION_COOKIES: [&str; 3] = [AUTH_COOKIE, USER_COOKIE, USER_TYPE_COOKIE];

pub const SESSION_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 7;
const EXPIRED_AT: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// Narrow projection of the session carried on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportSession {
    pub auth_flag: bool,
    pub user: Option<String>,
    pub user_kind: Option<String>,
}

impl TransportSession {
    pub fn is_authenticated(&self) -> bool {
        self.auth_flag && self.user.as_deref().is_some_and(|user| !user.is_empty())
    }

    /// Parses a raw `Cookie` request header.
    pub fn from_cookie_header(header: &str) -> Self {
        Self::from_pairs(header.split(';').filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim(), value.trim()))
        }))
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut session = Self::default();
        for (name, value) in pairs {
            match name {
                AUTH_COOKIE => session.auth_flag = value == "true",
                USER_COOKIE => session.user = Some(decode_cookie_value(value)),
                USER_TYPE_COOKIE => session.user_kind = Some(decode_cookie_value(value)),
                _ => {}
            }
        }
        session
    }
}

pub fn encode_cookie_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn decode_cookie_value(raw: &str) -> String {
    form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

/// Seconds the transport flag may live for a session ending at `expires_at`,
/// capped at [`SESSION_MAX_AGE_SECS`]. Rounds down so the cookie never outlives
/// the record it mirrors.
pub fn session_max_age(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().clamp(0, SESSION_MAX_AGE_SECS)
}

/// `Set-Cookie` values establishing the transport flag for `identity` until
/// `expires_at`.
pub fn login_cookies(
    identity: &Identity,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let attrs = format!("Path=/; Max-Age={}", session_max_age(expires_at, now));
    vec![
        format!("{AUTH_COOKIE}=true; {attrs}"),
        format!(
            "{USER_COOKIE}={}; {attrs}",
            encode_cookie_value(&identity.display_name)
        ),
        format!(
            "{USER_TYPE_COOKIE}={}; {attrs}",
            encode_cookie_value(&identity.kind)
        ),
    ]
}

/// `Set-Cookie` values clearing the transport flag.
pub fn logout_cookies() -> Vec<String> {
    SESSION_COOKIES
        .iter()
        .map(|name| format!("{name}=; Path=/; Expires={EXPIRED_AT}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// Minimal client-side cookie jar that honours `Max-Age` and `Expires`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: BTreeMap<String, StoredCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_set_cookie(&mut self, raw: &str, now: DateTime<Utc>) {
        let mut parts = raw.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let name = name.trim().to_string();
        let value = value.trim().to_string();

        let mut expires_at = None;
        for attr in parts {
            let Some((key, attr_value)) = attr.trim().split_once('=') else {
                continue;
            };
            if key.eq_ignore_ascii_case("max-age") {
                if let Ok(seconds) = attr_value.trim().parse::<i64>() {
                    expires_at = Some(now + chrono::Duration::seconds(seconds));
                }
            } else if key.eq_ignore_ascii_case("expires") && expires_at.is_none() {
                if let Ok(at) = DateTime::parse_from_rfc2822(attr_value.trim()) {
                    expires_at = Some(at.with_timezone(&Utc));
                }
            }
        }

        if expires_at.is_some_and(|at| at <= now) {
            self.cookies.remove(&name);
        } else {
            self.cookies.insert(name, StoredCookie { value, expires_at });
        }
    }

    pub fn get(&self, name: &str, now: DateTime<Utc>) -> Option<&str> {
        self.cookies
            .get(name)
            .filter(|cookie| cookie.expires_at.map_or(true, |at| at > now))
            .map(|cookie| cookie.value.as_str())
    }

    /// Renders the `Cookie` request header, or `None` if the jar is empty.
    pub fn header(&self, now: DateTime<Utc>) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|(_, cookie)| cookie.expires_at.map_or(true, |at| at > now))
            .map(|(name, cookie)| format!("{name}={}", cookie.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    pub fn session(&self, now: DateTime<Utc>) -> TransportSession {
        TransportSession::from_pairs(
            SESSION_COOKIES
                .iter()
                .filter_map(|name| self.get(name, now).map(|value| (*name, value))),
        )
    }
}
