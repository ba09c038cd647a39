//! Session store: the single owner of the session view model
//!
//! Every transition that talks to the network (startup verification, login,
//! registration, refresh) is guarded by `is_loading`: the flag is checked and
//! set under one write lock, and a call that finds it set is refused with
//! [`SessionError::Busy`] without touching the network.
//!
//! The [`TokenStore`] is the source of truth for credentials. The session
//! keeps a copy for observers and reconciles it from [`ApiEvent`]s, which the
//! API client publishes when it rotates or drops the pair on its own.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use prakriti_core::types::{AuthPayload, LoginCredentials, RegisterData, User, UserPatch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::api::{ApiClient, ApiEvent};
use super::error::{ApiError, SessionError};
use super::persistence::{SessionPersistence, StoragePersistence};
use super::service::{AuthService, Provider};
use super::state::{AuthPhase, Notice, Session, SessionEvent, SessionView};
use super::tokens::TokenStore;
use super::transport::ReqwestTransport;
use crate::config::ClientConfig;

pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);
pub const LOGGED_OUT_MESSAGE: &str = "Logged out successfully";

#[derive(Clone)]
pub struct SessionStore {
    auth: AuthService,
    persistence: Arc<dyn SessionPersistence>,
    state: Arc<RwLock<Session>>,
    api_events: Receiver<ApiEvent>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    refresh_buffer: Duration,
}

impl SessionStore {
    pub fn new(auth: AuthService, persistence: Arc<dyn SessionPersistence>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let api_events = auth.api().events();
        Self {
            auth,
            persistence,
            state: Arc::new(RwLock::new(Session::default())),
            api_events,
            events_tx,
            events_rx,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
        }
    }

    /// Wire up the production stack described by `config`
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let storage = config.open_storage()?;
        let transport = ReqwestTransport::new(&config.api_url, config.request_timeout())?;
        let tokens = TokenStore::new(storage.clone());
        let api = ApiClient::new(Arc::new(transport), tokens);
        let persistence = Arc::new(StoragePersistence::new(storage));
        Ok(Self::new(AuthService::new(api), persistence)
            .with_refresh_buffer(config.refresh_buffer()))
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn view(&self) -> SessionView {
        SessionView::new(self.state.clone())
    }

    pub fn snapshot(&self) -> Session {
        self.state.read().clone()
    }

    /// Notices and lifecycle changes, in the order they happened
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    fn tokens(&self) -> &TokenStore {
        self.auth.tokens()
    }

    /// Rehydrate the persisted snapshot. No network.
    pub fn restore(&self) {
        let persisted = match self.persistence.load() {
            Ok(persisted) => persisted.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load persisted session: {}", e);
                Default::default()
            }
        };

        let tokens = self.tokens();
        if tokens.is_empty() {
            match (&persisted.token, &persisted.refresh_token) {
                (Some(access), Some(refresh)) => tokens.set_tokens(access, refresh),
                (Some(access), None) => tokens.set_access_token(access),
                _ => {}
            }
        }

        let mut session = Session::from_persisted(persisted);
        session.access_token = tokens.access_token();
        session.refresh_token = tokens.refresh_token();
        if session.access_token.is_none() || session.user.is_none() {
            session.is_authenticated = false;
            session.phase = AuthPhase::Anonymous;
        }
        debug!("Restored session: {}", session.phase);
        self.update(|state| *state = session);
    }

    /// Startup verification of the stored access token.
    ///
    /// Falls back to a refresh when verification fails and a refresh token
    /// exists. Every failure ends quietly in [`AuthPhase::Anonymous`].
    pub async fn check_auth(&self) -> Result<AuthPhase, SessionError> {
        self.reconcile();
        self.begin(None)?;
        if self.tokens().access_token().is_none() {
            self.update(|state| state.reset(AuthPhase::Anonymous));
            return Ok(AuthPhase::Anonymous);
        }

        self.set_phase(AuthPhase::Verifying);
        match self.auth.verify_session().await {
            Ok(user) => {
                self.adopt_verified(user);
                Ok(AuthPhase::Authenticated)
            }
            Err(e) => {
                debug!("Session verification failed: {}", e);
                if self.tokens().refresh_token().is_none() {
                    self.expire(false);
                    return Ok(AuthPhase::Anonymous);
                }
                match self.renew(false).await {
                    Ok(_) => Ok(AuthPhase::Authenticated),
                    Err(_) => Ok(AuthPhase::Anonymous),
                }
            }
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, SessionError> {
        self.reconcile();
        self.begin(None)?;
        let result = self.auth.login(credentials).await;
        self.finish_sign_in(result, |user| {
            format!("Welcome back, {}!", user.greeting_name())
        })
    }

    pub async fn register(&self, data: &RegisterData) -> Result<User, SessionError> {
        self.reconcile();
        self.begin(None)?;
        let result = self.auth.register(data).await;
        self.finish_sign_in(result, |user| {
            format!("Welcome to Prakriti, {}!", user.greeting_name())
        })
    }

    pub async fn login_with_provider(
        &self,
        provider: Provider,
        token: &str,
    ) -> Result<User, SessionError> {
        self.reconcile();
        self.begin(None)?;
        let result = self.auth.login_with_provider(provider, token).await;
        self.finish_sign_in(result, |user| {
            format!("Welcome back, {}!", user.greeting_name())
        })
    }

    /// Rotate the credential pair. A failure ends the session and publishes
    /// [`SessionEvent::Expired`].
    pub async fn refresh_auth(&self) -> Result<User, SessionError> {
        self.reconcile();
        self.begin(Some(AuthPhase::Refreshing))?;
        self.renew(true).await
    }

    /// Refresh when the access token is about to expire.
    /// Returns whether a refresh happened.
    pub async fn refresh_if_due(&self) -> Result<bool, SessionError> {
        self.reconcile();
        if !self.tokens().needs_refresh(self.refresh_buffer) {
            return Ok(false);
        }
        self.refresh_auth().await.map(|_| true)
    }

    /// Keep the session fresh until the returned task is aborted
    pub fn spawn_background_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.refresh_if_due().await {
                    Ok(true) => debug!("Background refresh rotated tokens"),
                    Ok(false) | Err(SessionError::Busy) => {}
                    Err(e) => debug!("Background refresh failed: {}", e),
                }
            }
        })
    }

    /// Leave the session. Local state is cleared before the server is told,
    /// and stays cleared whatever the server says.
    pub async fn logout(&self) {
        self.update(|state| state.reset(AuthPhase::Anonymous));
        self.notify(SessionEvent::Notice(Notice::success(LOGGED_OUT_MESSAGE)));
        self.auth.logout().await;
    }

    /// Drop the session and the credentials without telling the server
    pub fn clear_auth(&self) {
        self.tokens().clear();
        self.update(|state| state.reset(AuthPhase::Anonymous));
    }

    /// Merge a partial profile update into the current user
    pub fn update_user(&self, patch: UserPatch) -> Result<User, SessionError> {
        self.update(|state| match state.user.as_mut() {
            Some(user) => {
                user.apply(patch);
                Ok(user.clone())
            }
            None => Err(SessionError::NotAuthenticated),
        })
    }

    /// Fold credential changes made by the API client into the session.
    /// Stale events are ignored: the token store decides.
    pub fn reconcile(&self) {
        if self.state.read().is_loading {
            return;
        }
        for event in self.api_events.try_iter() {
            match event {
                ApiEvent::TokensRotated(payload) => {
                    if self.tokens().access_token().as_deref() != Some(payload.token.as_str()) {
                        continue;
                    }
                    debug!("Adopting rotated tokens");
                    self.update(|state| {
                        state.authenticate(payload.user, payload.token, Some(payload.refresh_token))
                    });
                }
                ApiEvent::SessionExpired => {
                    if self.tokens().is_empty() && self.state.read().is_authenticated {
                        self.expire(true);
                    }
                }
            }
        }
    }

    /// Claim the loading flag, refusing if another transition holds it
    fn begin(&self, phase: Option<AuthPhase>) -> Result<(), SessionError> {
        let changed = {
            let mut state = self.state.write();
            if state.is_loading {
                return Err(SessionError::Busy);
            }
            state.is_loading = true;
            match phase {
                Some(phase) if state.phase != phase => {
                    state.phase = phase;
                    Some(phase)
                }
                _ => None,
            }
        };
        if let Some(phase) = changed {
            self.notify(SessionEvent::Changed(phase));
        }
        Ok(())
    }

    /// Refresh with the loading flag already held
    async fn renew(&self, notify_expiry: bool) -> Result<User, SessionError> {
        self.set_phase(AuthPhase::Refreshing);
        match self.auth.refresh().await {
            Ok(payload) => Ok(self.adopt(payload)),
            Err(e) => {
                self.expire(notify_expiry);
                Err(e.into())
            }
        }
    }

    fn finish_sign_in(
        &self,
        result: Result<AuthPayload, ApiError>,
        welcome: impl FnOnce(&User) -> String,
    ) -> Result<User, SessionError> {
        match result {
            Ok(payload) => {
                let user = self.adopt(payload);
                self.notify(SessionEvent::Notice(Notice::success(welcome(&user))));
                Ok(user)
            }
            Err(e) => {
                self.update(|state| state.is_loading = false);
                self.notify(SessionEvent::Notice(Notice::error(e.message.clone())));
                Err(e.into())
            }
        }
    }

    fn adopt(&self, payload: AuthPayload) -> User {
        let user = payload.user.clone();
        self.update(|state| {
            state.authenticate(payload.user, payload.token, Some(payload.refresh_token))
        });
        user
    }

    /// Adopt a verified profile with whatever credentials the token store holds
    fn adopt_verified(&self, user: User) {
        let access = self.tokens().access_token();
        let refresh = self.tokens().refresh_token();
        self.update(|state| match access {
            Some(access) => state.authenticate(user, access, refresh),
            None => state.reset(AuthPhase::Anonymous),
        });
    }

    fn expire(&self, notify: bool) {
        self.tokens().clear();
        self.update(|state| state.reset(AuthPhase::Expired));
        self.set_phase(AuthPhase::Anonymous);
        if notify {
            self.notify(SessionEvent::Expired);
        }
    }

    fn set_phase(&self, phase: AuthPhase) {
        self.update(|state| state.phase = phase);
    }

    /// Apply a mutation, persist the result and announce a phase change
    fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let (result, snapshot, changed) = {
            let mut state = self.state.write();
            let before = state.phase;
            let result = f(&mut state);
            let changed = (state.phase != before).then_some(state.phase);
            (result, state.to_persisted(), changed)
        };

        if let Err(e) = self.persistence.save(&snapshot) {
            warn!("Failed to persist session: {}", e);
        }
        if let Some(phase) = changed {
            self.notify(SessionEvent::Changed(phase));
        }
        result
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }
}
