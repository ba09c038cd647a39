//! Current credential pair, mirrored to durable storage

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prakriti_core::types::AuthPayload;
use tracing::warn;

use super::storage::Storage;

pub const ACCESS_TOKEN_KEY: &str = "auth-token";
pub const REFRESH_TOKEN_KEY: &str = "refresh-token";
pub const ACCESS_EXPIRY_KEY: &str = "auth-token-expiry";

/// Access token plus the refresh token that rotates it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted, if the server said
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    /// A lifetime too large to represent counts as no known expiry
    pub fn from_payload(payload: &AuthPayload) -> Self {
        let expires_at = payload
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        Self {
            access_token: payload.token.clone(),
            refresh_token: payload.refresh_token.clone(),
            expires_at,
        }
    }
}

#[derive(Debug, Default)]
struct Credentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Owner of the credential pair.
///
/// Reads are served from memory. Every mutation is written through to the
/// backing [`Storage`]; a failed write is logged and the in-memory value
/// still changes, so the running process keeps working.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    credentials: Arc<RwLock<Credentials>>,
}

impl TokenStore {
    /// Open the store, loading whatever a previous run left behind
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let credentials = Credentials {
            access_token: read_key(storage.as_ref(), ACCESS_TOKEN_KEY),
            refresh_token: read_key(storage.as_ref(), REFRESH_TOKEN_KEY),
            expires_at: read_key(storage.as_ref(), ACCESS_EXPIRY_KEY)
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|at| at.with_timezone(&Utc)),
        };
        Self {
            storage,
            credentials: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Replace both tokens; the access token becomes the default credential
    pub fn set_tokens(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        self.set_pair(TokenPair::new(access_token, refresh_token));
    }

    /// Replace both tokens from a credential-issuing response
    pub fn adopt(&self, payload: &AuthPayload) {
        self.set_pair(TokenPair::from_payload(payload));
    }

    pub fn set_pair(&self, pair: TokenPair) {
        {
            let mut credentials = self.credentials.write();
            credentials.access_token = Some(pair.access_token.clone());
            credentials.refresh_token = Some(pair.refresh_token.clone());
            credentials.expires_at = pair.expires_at;
        }

        self.write_key(ACCESS_TOKEN_KEY, Some(&pair.access_token));
        self.write_key(REFRESH_TOKEN_KEY, Some(&pair.refresh_token));
        let expiry = pair.expires_at.map(|at| at.to_rfc3339());
        self.write_key(ACCESS_EXPIRY_KEY, expiry.as_deref());
    }

    /// Replace only the access token, keeping the refresh token
    pub fn set_access_token(&self, access_token: impl Into<String>) {
        let access_token = access_token.into();
        {
            let mut credentials = self.credentials.write();
            credentials.access_token = Some(access_token.clone());
            credentials.expires_at = None;
        }
        self.write_key(ACCESS_TOKEN_KEY, Some(&access_token));
        self.write_key(ACCESS_EXPIRY_KEY, None);
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.credentials.read().refresh_token.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credentials.read().expires_at
    }

    /// Both tokens, when both are present
    pub fn pair(&self) -> Option<TokenPair> {
        let credentials = self.credentials.read();
        Some(TokenPair {
            access_token: credentials.access_token.clone()?,
            refresh_token: credentials.refresh_token.clone()?,
            expires_at: credentials.expires_at,
        })
    }

    pub fn is_empty(&self) -> bool {
        let credentials = self.credentials.read();
        credentials.access_token.is_none() && credentials.refresh_token.is_none()
    }

    /// True when a refresh token exists and the access token is missing or
    /// expires within `buffer`. Without a known expiry nothing is due.
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        let credentials = self.credentials.read();
        if credentials.refresh_token.is_none() {
            return false;
        }
        if credentials.access_token.is_none() {
            return true;
        }
        let Some(expires_at) = credentials.expires_at else {
            return false;
        };
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
        expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|due| due <= Utc::now())
    }

    /// Forget both tokens, in memory and on disk
    pub fn clear(&self) {
        *self.credentials.write() = Credentials::default();
        self.write_key(ACCESS_TOKEN_KEY, None);
        self.write_key(REFRESH_TOKEN_KEY, None);
        self.write_key(ACCESS_EXPIRY_KEY, None);
    }

    fn write_key(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.storage.set(key, value),
            None => self.storage.remove(key),
        };
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", key, e);
        }
    }
}

fn read_key(storage: &dyn Storage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!("Failed to load {}: {}", key, e);
            None
        }
    }
}
