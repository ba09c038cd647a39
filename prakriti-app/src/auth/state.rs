//! Session view model

use std::sync::Arc;

use parking_lot::RwLock;
use prakriti_core::types::User;
use strum_macros::{Display, IntoStaticStr};

use super::persistence::PersistedSession;

/// Position in the session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum AuthPhase {
    #[default]
    Anonymous,
    Verifying,
    Authenticated,
    Refreshing,
    Expired,
}

/// Authenticated-user view model.
///
/// `is_authenticated` implies both `user` and `access_token` are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub phase: AuthPhase,
}

impl Session {
    pub fn from_persisted(persisted: PersistedSession) -> Self {
        let is_authenticated =
            persisted.is_authenticated && persisted.user.is_some() && persisted.token.is_some();
        Self {
            user: persisted.user,
            access_token: persisted.token,
            refresh_token: persisted.refresh_token,
            is_authenticated,
            is_loading: false,
            phase: if is_authenticated {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Anonymous
            },
        }
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated && self.user.as_ref().is_some_and(User::is_admin)
    }

    /// Adopt a user and credential pair in one step
    pub(crate) fn authenticate(
        &mut self,
        user: User,
        access_token: String,
        refresh_token: Option<String>,
    ) {
        self.user = Some(user);
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.is_authenticated = true;
        self.is_loading = false;
        self.phase = AuthPhase::Authenticated;
    }

    /// Drop everything; `phase` records why
    pub(crate) fn reset(&mut self, phase: AuthPhase) {
        *self = Session {
            phase,
            ..Session::default()
        };
    }
}

/// Read-only handle on the session owned by a `SessionStore`
#[derive(Clone)]
pub struct SessionView {
    inner: Arc<RwLock<Session>>,
}

impl SessionView {
    pub(crate) fn new(inner: Arc<RwLock<Session>>) -> Self {
        Self { inner }
    }

    pub fn snapshot(&self) -> Session {
        self.inner.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.read().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.inner.read().is_loading
    }

    pub fn phase(&self) -> AuthPhase {
        self.inner.read().phase
    }

    pub fn is_admin(&self) -> bool {
        self.inner.read().is_admin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-facing message, rendered by the front end as it sees fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Changed(AuthPhase),
    Notice(Notice),
    /// The session could not be renewed; the front end should send the user
    /// to the login entry point
    Expired,
}
