//! Auth service for the credential endpoints

use prakriti_core::types::{AuthPayload, LoginCredentials, RegisterData, User};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString, IntoStaticStr};
use tracing::{debug, warn};

use super::api::{ApiClient, ApiRequest};
use super::error::ApiResult;
use super::tokens::TokenStore;

pub const LOGIN_FAILED: &str = "Login failed";
pub const REGISTRATION_FAILED: &str = "Registration failed";
pub const VERIFICATION_FAILED: &str = "Session verification failed";
const REQUEST_FAILED: &str = "Request failed";

/// Federated identity providers accepted by `/auth/{provider}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    Google,
    Facebook,
}

/// Auth service for all authentication operations
#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
}

impl AuthService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn tokens(&self) -> &TokenStore {
        self.api.tokens()
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> ApiResult<AuthPayload> {
        let request = ApiRequest::post("/auth/login").json(credentials)?;
        self.issue_credentials(request, LOGIN_FAILED).await
    }

    pub async fn register(&self, data: &RegisterData) -> ApiResult<AuthPayload> {
        let request = ApiRequest::post("/auth/register").json(data)?;
        self.issue_credentials(request, REGISTRATION_FAILED).await
    }

    /// Exchange a provider-issued token for a Prakriti session
    pub async fn login_with_provider(
        &self,
        provider: Provider,
        token: &str,
    ) -> ApiResult<AuthPayload> {
        let request =
            ApiRequest::post(format!("/auth/{}", provider)).json(&json!({ "token": token }))?;
        self.issue_credentials(request, LOGIN_FAILED).await
    }

    /// Forget the credentials, then tell the server using the token just
    /// dropped. Nothing local is left to clear once this first awaits.
    pub async fn logout(&self) {
        let bearer = self.tokens().access_token();
        self.tokens().clear();

        let request = ApiRequest::post("/auth/logout")
            .no_refresh()
            .with_bearer(bearer);
        if let Err(e) = self.api.send::<Value>(request).await {
            warn!("Logout error: {}", e);
        }
    }

    /// Profile of the user the current access token belongs to
    pub async fn verify_session(&self) -> ApiResult<User> {
        self.api
            .get::<User>("/auth/me")
            .await?
            .into_data(VERIFICATION_FAILED)
    }

    /// Rotate the credential pair. A failure has already cleared the tokens.
    pub async fn refresh(&self) -> ApiResult<AuthPayload> {
        self.api.refresh_session().await
    }

    pub async fn request_password_reset(&self, email: &str) -> ApiResult<Option<String>> {
        let request = ApiRequest::post("/auth/forgot-password")
            .json(&json!({ "email": email }))?
            .no_refresh();
        self.acknowledge(request).await
    }

    pub async fn complete_password_reset(
        &self,
        token: &str,
        password: &str,
    ) -> ApiResult<Option<String>> {
        let request = ApiRequest::post("/auth/reset-password")
            .json(&json!({ "token": token, "password": password }))?
            .no_refresh();
        self.acknowledge(request).await
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> ApiResult<Option<String>> {
        let request = ApiRequest::post("/auth/change-password").json(&json!({
            "currentPassword": current_password,
            "newPassword": new_password,
        }))?;
        self.acknowledge(request).await
    }

    async fn issue_credentials(
        &self,
        request: ApiRequest,
        fallback: &str,
    ) -> ApiResult<AuthPayload> {
        let path = request.path.clone();
        let payload = self
            .api
            .send::<AuthPayload>(request.no_refresh())
            .await?
            .into_data(fallback)?;
        self.tokens().adopt(&payload);
        debug!("{} issued credentials for {}", path, payload.user.id);
        Ok(payload)
    }

    async fn acknowledge(&self, request: ApiRequest) -> ApiResult<Option<String>> {
        self.api.send::<Value>(request).await?.into_ack(REQUEST_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::ErrorKind;
    use crate::auth::testing::{auth_body, fixture, unauthorized, user_body};
    use reqwest::StatusCode;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_login_stores_both_tokens() {
        let fx = fixture();
        fx.transport.respond(StatusCode::OK, auth_body("u1", "a1", "r1"));
        let service = AuthService::new(fx.api.clone());

        let payload = service
            .login(&LoginCredentials::new("u1@example.com", "secret"))
            .await
            .unwrap();
        assert_eq!(payload.user.id, "u1");
        assert_eq!(fx.tokens.access_token().as_deref(), Some("a1"));
        assert_eq!(fx.tokens.refresh_token().as_deref(), Some("r1"));

        let call = &fx.transport.calls()[0];
        assert_eq!(call.path, "/auth/login");
        assert_eq!(
            call.body,
            Some(json!({ "email": "u1@example.com", "password": "secret" }))
        );
    }

    #[tokio::test]
    async fn test_bad_password_is_not_refreshed() {
        let fx = fixture();
        fx.tokens.set_tokens("old", "r-old");
        fx.transport.respond(
            StatusCode::UNAUTHORIZED,
            json!({ "success": false, "error": { "message": "Invalid credentials", "code": "INVALID_CREDENTIALS", "statusCode": 401 } }),
        );
        let service = AuthService::new(fx.api.clone());

        let err = service
            .login(&LoginCredentials::new("a@b.c", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Invalid credentials");
        assert_eq!(fx.transport.paths(), vec!["/auth/login"]);
        assert_eq!(fx.tokens.refresh_token().as_deref(), Some("r-old"));
    }

    #[tokio::test]
    async fn test_rejected_envelope_uses_fallback() {
        let fx = fixture();
        fx.transport.respond(StatusCode::CREATED, json!({ "success": false }));
        let service = AuthService::new(fx.api.clone());

        let err = service
            .register(&RegisterData {
                username: "asha".to_string(),
                email: "asha@example.com".to_string(),
                password: "secret".to_string(),
                display_name: "Asha".to_string(),
                agree_to_terms: true,
            })
            .await
            .unwrap_err();
        assert_eq!(err.message, REGISTRATION_FAILED);
        assert_eq!(err.status_code, Some(201));
        assert!(fx.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_even_on_transport_failure() {
        let fx = fixture();
        fx.tokens.set_tokens("a1", "r1");
        fx.transport.fail("network down");
        let service = AuthService::new(fx.api.clone());

        service.logout().await;
        assert!(fx.tokens.is_empty());
        assert!(fx.storage.is_empty());
        assert_eq!(fx.transport.calls()[0].bearer.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_forgot_password_leaves_tokens_alone() {
        let fx = fixture();
        fx.tokens.set_tokens("a1", "r1");
        fx.transport.respond(
            StatusCode::OK,
            json!({ "success": true, "message": "Password reset email sent" }),
        );
        let service = AuthService::new(fx.api.clone());

        let message = service
            .request_password_reset("asha@example.com")
            .await
            .unwrap();
        assert_eq!(message.as_deref(), Some("Password reset email sent"));
        assert_eq!(fx.tokens.access_token().as_deref(), Some("a1"));
        assert_eq!(fx.tokens.refresh_token().as_deref(), Some("r1"));
        assert_eq!(fx.storage.len(), 2);

        let fx = fixture();
        fx.transport.respond(StatusCode::OK, json!({ "success": true }));
        let service = AuthService::new(fx.api.clone());
        assert_eq!(service.request_password_reset("x@y.z").await.unwrap(), None);
        assert!(fx.tokens.is_empty());
    }

    #[tokio::test]
    async fn test_provider_login_path() {
        let fx = fixture();
        fx.transport.respond(StatusCode::OK, auth_body("u9", "g1", "gr1"));
        let service = AuthService::new(fx.api.clone());

        let provider = Provider::from_str("google").unwrap();
        service.login_with_provider(provider, "id-token").await.unwrap();

        let call = &fx.transport.calls()[0];
        assert_eq!(call.path, "/auth/google");
        assert_eq!(call.body, Some(json!({ "token": "id-token" })));
        assert_eq!(fx.tokens.access_token().as_deref(), Some("g1"));
        assert!(Provider::from_str("github").is_err());
    }

    #[tokio::test]
    async fn test_verify_recovers_through_refresh() {
        let fx = fixture();
        fx.tokens.set_tokens("stale", "r1");
        fx.transport.respond(StatusCode::UNAUTHORIZED, unauthorized());
        fx.transport.respond(StatusCode::OK, auth_body("u1", "fresh", "r2"));
        fx.transport.respond(StatusCode::OK, user_body("u1"));
        let service = AuthService::new(fx.api.clone());

        let user = service.verify_session().await.unwrap();
        assert_eq!(user.id, "u1");
        let calls = fx.transport.calls();
        assert_eq!(calls[0].bearer.as_deref(), Some("stale"));
        assert_eq!(calls[2].bearer.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_change_password_validation_error() {
        let fx = fixture();
        fx.tokens.set_tokens("a1", "r1");
        fx.transport.respond(
            StatusCode::BAD_REQUEST,
            json!({
                "success": false,
                "error": {
                    "message": "Validation Error",
                    "code": "VALIDATION_ERROR",
                    "statusCode": 400,
                    "details": [{ "field": "newPassword", "message": "Password too short", "code": "MIN_LENGTH" }]
                }
            }),
        );
        let service = AuthService::new(fx.api.clone());

        let err = service.change_password("old", "x").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.field_message("newPassword"), Some("Password too short"));
        assert_eq!(fx.transport.calls().len(), 1);
    }
}
