//! Per-backend token cache.
//!
//! `BackendState` is the only mutable data a backend owns. The token fields sit
//! behind a short-lived `RwLock` (never held across an await); refreshes are
//! serialized by a separate async mutex so at most one login is in flight per
//! backend.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

/// Margin before expiry at which a token is treated as stale.
pub const REFRESH_BUFFER: TimeDelta = TimeDelta::seconds(60);

/// Cached bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    token: Option<String>,
    /// Raw expiry from the token; `None` means it never expires.
    expires_at: Option<DateTime<Utc>>,
    /// When the token stops being handed out: expiry minus the refresh buffer,
    /// or the raw expiry when the buffered instant had already passed at store time.
    refresh_at: Option<DateTime<Utc>>,
}

impl TokenState {
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let refresh_at = expires_at.map(|expiry| {
            match expiry.checked_sub_signed(REFRESH_BUFFER) {
                Some(buffered) if buffered > now => buffered,
                _ => expiry,
            }
        });
        Self {
            token: Some(token),
            expires_at,
            refresh_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let has_token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        has_token && self.refresh_at.is_none_or(|refresh_at| now < refresh_at)
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Mutable authentication state of one backend, alive for the whole process.
#[derive(Debug, Default)]
pub struct BackendState {
    token: RwLock<TokenState>,
    pub(crate) refresh_lock: Mutex<()>,
}

impl BackendState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TokenState> {
        self.token.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TokenState> {
        self.token.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A token is cached and not inside its refresh window.
    pub fn has_valid_token(&self) -> bool {
        self.read().is_valid_at(Utc::now())
    }

    /// The cached token if it is still valid.
    pub fn valid_token(&self) -> Option<String> {
        let state = self.read();
        if state.is_valid_at(Utc::now()) {
            state.token.clone()
        } else {
            None
        }
    }

    /// The cached token regardless of validity.
    pub fn cached_token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn snapshot(&self) -> TokenState {
        self.read().clone()
    }

    pub fn store_token(&self, token: String, expires_at: Option<DateTime<Utc>>) {
        *self.write() = TokenState::new(token, expires_at, Utc::now());
    }

    pub fn clear_token(&self) {
        *self.write() = TokenState::default();
    }

    /// Clear the cache only if it still holds `token`. Returns whether it did.
    ///
    /// A caller that got 401 with an old token must not wipe a token another
    /// caller has just refreshed.
    pub fn clear_if_current(&self, token: &str) -> bool {
        let mut state = self.write();
        if state.token.as_deref() == Some(token) {
            *state = TokenState::default();
            true
        } else {
            false
        }
    }

    /// Cache `api_key` as a non-expiring token unless a token is already cached.
    pub fn adopt_api_key(&self, api_key: &str) -> String {
        let mut state = self.write();
        match state.token.as_deref() {
            Some(existing) if !existing.is_empty() => existing.to_string(),
            _ => {
                *state = TokenState::new(api_key.to_string(), None, Utc::now());
                api_key.to_string()
            }
        }
    }
}

/// Read the `exp` claim of a three-part JWT-like token.
///
/// Any decoding problem yields `None`: the token is then treated as non-expiring.
pub fn decode_token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let padding = match payload.len() % 4 {
        0 => "",
        2 => "==",
        3 => "=",
        _ => return None,
    };
    let bytes = URL_SAFE.decode(format!("{payload}{padding}")).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;

    #[allow(clippy::cast_possible_truncation)]
    let seconds = exp
        .as_i64()
        .or_else(|| exp.as_f64().map(|secs| secs.trunc() as i64))?;
    DateTime::from_timestamp(seconds, 0)
}
