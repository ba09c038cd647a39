//! Single egress point for API calls
//!
//! Every request goes out with the current access token as bearer. A 401 on a
//! request that allows it triggers one refresh of the credential pair and one
//! re-issue of the original request; nothing is ever retried twice.
//!
//! Refreshes are serialized. A request whose 401 arrives after another
//! request already rotated the pair is re-issued with the new token instead
//! of spending the (now rotated) refresh token a second time.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use prakriti_core::types::{AuthPayload, Envelope};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::error::{ApiError, ApiResult, ErrorKind};
use super::tokens::TokenStore;
use super::transport::{OutboundRequest, RawResponse, Transport};

pub const TOKEN_REFRESH_FAILED: &str = "Token refresh failed";
pub const CREDENTIALS_CHANGED: &str = "Credentials changed during refresh";

/// Undelivered events beyond this are dropped oldest first
pub const API_EVENT_CAPACITY: usize = 16;

/// Published whenever the client changes the credential pair on its own
#[derive(Debug, Clone, PartialEq)]
pub enum ApiEvent {
    /// A 401 was recovered by a refresh, the new pair is already stored
    TokensRotated(AuthPayload),
    /// The refresh protocol gave up and the token store was cleared
    SessionExpired,
}

/// Request as described by the caller, before a token is attached
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Whether a 401 may be recovered by refreshing the credential pair
    pub refreshable: bool,
    /// Sent instead of the stored access token
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            refreshable: true,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body).map_err(ApiError::encode)?);
        Ok(self)
    }

    /// Credential exchanges answer 401 for bad credentials, not for a stale
    /// access token, so they never enter the refresh protocol
    pub fn no_refresh(mut self) -> Self {
        self.refreshable = false;
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

/// A request that may be re-issued once after a refresh
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: ApiRequest,
    pub attempted: bool,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            attempted: false,
        }
    }

    fn should_refresh(&self, status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED && self.request.refreshable && !self.attempted
    }
}

/// Decoded success response
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub envelope: Envelope<T>,
}

impl<T> Reply<T> {
    /// The envelope's data, or an error carrying its reason (or `fallback`)
    pub fn into_data(self, fallback: &str) -> ApiResult<T> {
        match self.envelope.data {
            Some(data) if self.envelope.success => Ok(data),
            _ => Err(ApiError::rejected(self.envelope.reason(), fallback, self.status)),
        }
    }

    /// Accept a data-less acknowledgement, returning its message
    pub fn into_ack(self, fallback: &str) -> ApiResult<Option<String>> {
        if self.envelope.success {
            Ok(self.envelope.message)
        } else {
            Err(ApiError::rejected(self.envelope.reason(), fallback, self.status))
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    events_tx: Sender<ApiEvent>,
    events_rx: Receiver<ApiEvent>,
    refresh_lock: Arc<Mutex<()>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, tokens: TokenStore) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(API_EVENT_CAPACITY);
        Self {
            transport,
            tokens,
            events_tx,
            events_rx,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn events(&self) -> Receiver<ApiEvent> {
        self.events_rx.clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Reply<T>> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> ApiResult<Reply<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> ApiResult<Reply<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> ApiResult<Reply<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Reply<T>> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Issue a request, recovering from one 401 by refreshing the session
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<Reply<T>> {
        let mut pending = PendingRequest::new(request);
        loop {
            let bearer = pending
                .request
                .bearer
                .clone()
                .or_else(|| self.tokens.access_token());
            let response = self.dispatch(&pending.request, bearer.clone()).await?;
            if !pending.should_refresh(response.status) {
                return decode(response);
            }
            pending.attempted = true;

            if self.tokens.refresh_token().is_none() {
                debug!("401 on {} with no refresh token", pending.request.path);
                return decode(response);
            }

            debug!("401 on {}, refreshing session", pending.request.path);
            self.recover(bearer.as_deref()).await?;
        }
    }

    /// Get a pair newer than `stale_bearer`, refreshing only if nobody else
    /// already did while this request was in flight
    async fn recover(&self, stale_bearer: Option<&str>) -> ApiResult<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.rotated_since(stale_bearer) {
            debug!("Credentials already rotated, re-issuing");
            return Ok(());
        }
        match self.rotate().await {
            Ok(_) => Ok(()),
            Err(_) if self.rotated_since(stale_bearer) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn rotated_since(&self, bearer: Option<&str>) -> bool {
        self.tokens.refresh_token().is_some() && self.tokens.access_token().as_deref() != bearer
    }

    /// Rotate the credential pair using the stored refresh token.
    ///
    /// On success the new pair is stored and [`ApiEvent::TokensRotated`] is
    /// published. On any failure the token store is cleared,
    /// [`ApiEvent::SessionExpired`] is published and the error is the
    /// terminal session-expired error.
    ///
    /// If the pair is replaced or cleared while the exchange is in flight the
    /// outcome is discarded and the store is left alone.
    pub async fn refresh_session(&self) -> ApiResult<AuthPayload> {
        let _guard = self.refresh_lock.lock().await;
        self.rotate().await
    }

    /// Caller holds `refresh_lock`
    async fn rotate(&self) -> ApiResult<AuthPayload> {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            error!("Token refresh failed: no refresh token");
            return Err(self.expire());
        };

        let result = self.exchange_refresh_token(&refresh_token).await;
        if self.tokens.refresh_token().as_deref() != Some(refresh_token.as_str()) {
            debug!("Credentials changed during refresh, discarding the outcome");
            return Err(if self.tokens.is_empty() {
                ApiError::session_expired()
            } else {
                ApiError::new(ErrorKind::Unauthorized, CREDENTIALS_CHANGED)
            });
        }

        match result {
            Ok(payload) => {
                self.tokens.adopt(&payload);
                self.publish(ApiEvent::TokensRotated(payload.clone()));
                debug!("Tokens rotated");
                Ok(payload)
            }
            Err(e) => {
                error!("Token refresh failed: {}", e);
                Err(self.expire())
            }
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> ApiResult<AuthPayload> {
        let request = ApiRequest::post("/auth/refresh")
            .json(&json!({ "refreshToken": refresh_token }))?
            .no_refresh();
        let response = self.dispatch(&request, self.tokens.access_token()).await?;
        decode::<AuthPayload>(response)?.into_data(TOKEN_REFRESH_FAILED)
    }

    fn expire(&self) -> ApiError {
        self.tokens.clear();
        self.publish(ApiEvent::SessionExpired);
        ApiError::session_expired()
    }

    /// A full channel sheds its oldest event
    fn publish(&self, event: ApiEvent) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            let _ = self.events_rx.try_recv();
            let _ = self.events_tx.try_send(event);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<String>,
    ) -> ApiResult<RawResponse> {
        let outbound = OutboundRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer,
            body: request.body.clone(),
        };
        debug!("{} {}", outbound.method, outbound.path);

        let response = self.transport.execute(outbound).await?;
        debug!("{} {} -> {}", request.method, request.path, response.status);
        Ok(response)
    }
}

fn decode<T: DeserializeOwned>(response: RawResponse) -> ApiResult<Reply<T>> {
    if !response.status.is_success() {
        return Err(ApiError::from_response(response.status, &response.body));
    }
    let envelope = if response.body.trim().is_empty() {
        Envelope::empty()
    } else {
        serde_json::from_str(&response.body).map_err(ApiError::decode)?
    };
    Ok(Reply {
        status: response.status,
        envelope,
    })
}
