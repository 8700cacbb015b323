//! Signed cookie session store.

use std::{collections::BTreeMap, fmt};

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha512};
use time::OffsetDateTime;
use tracing::debug;

use crate::config::SessionSettings;

use super::error::InfraError;

pub const COOKIE_PATH: &str = "/";

/// Attributes applied to every session cookie.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub path: String,
    /// Cookie lifetime and server-side session lifetime. `None` means a browser-session cookie.
    pub max_age: Option<time::Duration>,
    pub secure: bool,
    pub same_site: SameSite,
}

/// Values stored in one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: BTreeMap<String, serde_json::Value>,
}

/// Signed cookie payload: the session values plus the unix time they were written.
#[derive(Serialize, Deserialize)]
struct Envelope<V> {
    iat: i64,
    values: V,
}

impl Session {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), InfraError> {
        let value = serde_json::to_value(value)
            .map_err(|err| InfraError::session(format!("unserializable session value: {err}")))?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn encode(&self, issued_at: OffsetDateTime) -> Result<String, InfraError> {
        let envelope = Envelope {
            iat: issued_at.unix_timestamp(),
            values: &self.values,
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|err| InfraError::session(format!("failed to encode session: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn decode(value: &str) -> Option<(Self, OffsetDateTime)> {
        let json = URL_SAFE_NO_PAD.decode(value).ok()?;
        let envelope: Envelope<BTreeMap<String, serde_json::Value>> =
            serde_json::from_slice(&json).ok()?;
        let issued_at = OffsetDateTime::from_unix_timestamp(envelope.iat).ok()?;
        Some((
            Self {
                values: envelope.values,
            },
            issued_at,
        ))
    }
}

/// Cookie-backed sessions signed with a key derived from the configured secret.
#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    cookie_name: String,
    options: SessionOptions,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("cookie_name", &self.cookie_name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn derive_key(secret: &str) -> Key {
    let mut hasher = Sha512::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize().to_vec();
    Key::from(digest.as_slice())
}

impl SessionStore {
    pub fn new(settings: &SessionSettings) -> Result<Self, InfraError> {
        let secret = settings.secret.expose();
        if secret.trim().is_empty() {
            return Err(InfraError::session("session secret must not be empty"));
        }

        let max_age = settings
            .max_age
            .map(time::Duration::try_from)
            .transpose()
            .map_err(|err| InfraError::session(format!("session max age out of range: {err}")))?;

        Ok(Self {
            key: derive_key(secret),
            cookie_name: settings.cookie_name.clone(),
            options: SessionOptions {
                path: COOKIE_PATH.to_string(),
                max_age,
                secure: settings.secure,
                same_site: SameSite::Lax,
            },
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn jar(&self, headers: &HeaderMap) -> SignedCookieJar {
        SignedCookieJar::from_headers(headers, self.key.clone())
    }

    /// Session cookie carrying `value`. HttpOnly is always set; `Max-Age` only when configured.
    pub fn cookie(&self, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.cookie_name.clone(), value))
            .path(self.options.path.clone())
            .secure(self.options.secure)
            .same_site(self.options.same_site)
            .http_only(true)
            .build();
        if let Some(max_age) = self.options.max_age {
            cookie.set_max_age(max_age);
        }
        cookie
    }

    /// The session in `jar`, or an empty one when the cookie is absent, unsigned, malformed
    /// or older than the configured max age.
    pub fn load(&self, jar: &SignedCookieJar) -> Session {
        self.load_at(jar, OffsetDateTime::now_utc())
    }

    fn load_at(&self, jar: &SignedCookieJar, now: OffsetDateTime) -> Session {
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return Session::default();
        };
        let Some((session, issued_at)) = Session::decode(cookie.value()) else {
            debug!(cookie = %self.cookie_name, "discarding undecodable session cookie");
            return Session::default();
        };
        if self
            .options
            .max_age
            .is_some_and(|max_age| now - issued_at > max_age)
        {
            debug!(
                cookie = %self.cookie_name,
                issued_at = issued_at.unix_timestamp(),
                "discarding expired session cookie"
            );
            return Session::default();
        }
        session
    }

    pub fn save(&self, jar: SignedCookieJar, session: &Session) -> Result<SignedCookieJar, InfraError> {
        Ok(jar.add(self.cookie(session.encode(OffsetDateTime::now_utc())?)))
    }

    pub fn clear(&self, jar: SignedCookieJar) -> SignedCookieJar {
        jar.remove(
            Cookie::build(self.cookie_name.clone())
                .path(self.options.path.clone())
                .build(),
        )
    }
}
