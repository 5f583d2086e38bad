//! Session context: the bearer token, its decoded claims and the listeners
//! that react when the session starts or ends.
//!
//! The context owns its [`KeyValueStore`] and is passed to whoever needs it.
//! Claims are decoded without verifying the signature; the backend remains
//! the authority and a rejected token surfaces as a 401/403 that ends the
//! session through [`SessionContext::handle_api_error`].

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::encoding::{decode_base64url_lenient, scalar_to_string};
use crate::error::ApiError;

pub const ACCESS_TOKEN_STORAGE_KEY: &str = "mkd_access_token";

pub trait KeyValueStore {
    type Error: fmt::Display;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;
    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error>;
    fn remove(&self, key: &str) -> Result<(), Self::Error>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    type Error = T::Error;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), Self::Error> {
        (**self).remove(key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> T {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl KeyValueStore for MemoryStore {
    type Error = Infallible;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.with_entries(|entries| entries.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.with_entries(|entries| entries.insert(key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Self::Error> {
        self.with_entries(|entries| entries.remove(key));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Administrator,
    SuperAdministrator,
    Other(String),
}

impl SessionRole {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "administrator" => Self::Administrator,
            "super_administrator" => Self::SuperAdministrator,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Administrator => "administrator",
            Self::SuperAdministrator => "super_administrator",
            Self::Other(raw) => raw,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Administrator | Self::SuperAdministrator)
    }

    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        matches!(self, Self::SuperAdministrator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session token must not be empty")]
    EmptyToken,
    #[error("session token is not a decodable jwt: {reason}")]
    MalformedToken { reason: String },
    #[error("session storage failed: {message}")]
    Storage { message: String },
}

impl SessionError {
    fn storage(error: impl fmt::Display) -> Self {
        Self::Storage {
            message: error.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionToken {
    raw: String,
    pub subject: Option<String>,
    pub role: Option<SessionRole>,
    pub expires_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        let payload = raw
            .split('.')
            .nth(1)
            .ok_or_else(|| SessionError::MalformedToken {
                reason: "missing payload segment".to_string(),
            })?;
        let bytes = decode_base64url_lenient(payload).map_err(|error| {
            SessionError::MalformedToken {
                reason: error.to_string(),
            }
        })?;
        let claims: RawClaims =
            serde_json::from_slice(&bytes).map_err(|error| SessionError::MalformedToken {
                reason: error.to_string(),
            })?;

        Ok(Self {
            raw: raw.to_string(),
            subject: claims.sub.as_ref().and_then(scalar_to_string),
            role: claims.role.as_deref().map(SessionRole::parse),
            expires_at: claims.exp.and_then(timestamp_from_seconds),
            issued_at: claims.iat.and_then(timestamp_from_seconds),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A token without `exp` never expires client-side.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

fn timestamp_from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { role: Option<SessionRole> },
    SignedOut,
    Expired,
    ForcedLogout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

pub struct SessionContext<S> {
    store: S,
    current: Option<SessionToken>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<S: fmt::Debug> fmt::Debug for SessionContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("store", &self.store)
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<S: KeyValueStore> SessionContext<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: None,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the persisted token. Expired and undecodable tokens are
    /// removed from storage and leave the context signed out.
    pub fn restore(&mut self, now: DateTime<Utc>) -> Result<Option<&SessionToken>, SessionError> {
        let stored = self
            .store
            .get(ACCESS_TOKEN_STORAGE_KEY)
            .map_err(SessionError::storage)?;
        let Some(raw) = stored else {
            self.current = None;
            return Ok(None);
        };
        match SessionToken::parse(&raw) {
            Ok(token) if !token.is_expired(now) => {
                tracing::debug!(subject = ?token.subject, "restored session token");
                self.current = Some(token);
            }
            Ok(_) => {
                tracing::info!("stored session token expired, discarding");
                self.discard_stored()?;
            }
            Err(error) => {
                tracing::warn!(%error, "stored session token unreadable, discarding");
                self.discard_stored()?;
            }
        }
        Ok(self.current.as_ref())
    }

    pub fn sign_in(&mut self, raw: &str) -> Result<&SessionToken, SessionError> {
        let token = SessionToken::parse(raw)?;
        self.store
            .set(ACCESS_TOKEN_STORAGE_KEY, token.as_str())
            .map_err(SessionError::storage)?;
        tracing::info!(
            subject = ?token.subject,
            role = token.role.as_ref().map_or("none", SessionRole::as_str),
            "signed in"
        );
        let event = SessionEvent::SignedIn {
            role: token.role.clone(),
        };
        self.notify(&event);
        Ok(self.current.insert(token))
    }

    pub fn sign_out(&mut self) -> Result<(), SessionError> {
        self.end_session(SessionEvent::SignedOut)
    }

    /// Ends the session after the backend rejected the token.
    pub fn force_logout(&mut self) -> Result<(), SessionError> {
        self.end_session(SessionEvent::ForcedLogout)
    }

    /// Returns the live token, dropping it first if it has expired.
    pub fn current(&mut self, now: DateTime<Utc>) -> Option<&SessionToken> {
        if self
            .current
            .as_ref()
            .is_some_and(|token| token.is_expired(now))
        {
            tracing::info!("session token expired");
            if let Err(error) = self.end_session(SessionEvent::Expired) {
                tracing::warn!(%error, "failed to remove expired session token");
            }
        }
        self.current.as_ref()
    }

    pub fn access_token(&mut self, now: DateTime<Utc>) -> Option<String> {
        self.current(now).map(|token| token.as_str().to_string())
    }

    /// Forces logout for 401/403 responses. Returns whether the session ended.
    pub fn handle_api_error(&mut self, error: &ApiError) -> bool {
        if !error.requires_logout() {
            return false;
        }
        tracing::warn!(
            status = error.status_code,
            kind = error.kind.as_str(),
            "backend rejected session"
        );
        if let Err(storage_error) = self.force_logout() {
            tracing::warn!(error = %storage_error, "failed to clear rejected session token");
        }
        true
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    fn end_session(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        let had_session = self.current.take().is_some();
        let removed = self
            .store
            .remove(ACCESS_TOKEN_STORAGE_KEY)
            .map_err(SessionError::storage);
        if had_session {
            if event == SessionEvent::SignedOut {
                tracing::info!("signed out");
            }
            self.notify(&event);
        }
        removed
    }

    fn discard_stored(&mut self) -> Result<(), SessionError> {
        self.current = None;
        self.store
            .remove(ACCESS_TOKEN_STORAGE_KEY)
            .map_err(SessionError::storage)
    }

    fn notify(&self, event: &SessionEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }
}
