//! In-process transport for tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::api::ApiClient;
use super::storage::MemoryStorage;
use super::tokens::TokenStore;
use super::transport::{OutboundRequest, RawResponse, Transport, TransportError};

type Hook = Box<dyn FnOnce() + Send>;

enum Step {
    Reply(Result<RawResponse, TransportError>),
    /// Never answers
    Stall,
}

/// Answers requests from a queue of canned outcomes and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<OutboundRequest>>,
    hooks: Mutex<Vec<(String, Hook)>>,
}

impl ScriptedTransport {
    pub fn respond(&self, status: StatusCode, body: Value) {
        self.respond_raw(status, body.to_string());
    }

    pub fn respond_raw(&self, status: StatusCode, body: impl Into<String>) {
        self.script
            .lock()
            .push_back(Step::Reply(Ok(RawResponse::new(status, body))));
    }

    pub fn fail(&self, message: &str) {
        self.script
            .lock()
            .push_back(Step::Reply(Err(TransportError::new(message))));
    }

    pub fn stall(&self) {
        self.script.lock().push_back(Step::Stall);
    }

    /// Run `hook` once, when a request for `path` arrives and before it is answered
    pub fn on_call(&self, path: &str, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((path.to_string(), Box::new(hook)));
    }

    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.path.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, TransportError> {
        let hook = {
            let mut hooks = self.hooks.lock();
            let found = hooks.iter().position(|(path, _)| *path == request.path);
            found.map(|index| hooks.remove(index).1)
        };
        self.calls.lock().push(request);
        // let concurrently joined futures interleave like a real network call
        tokio::task::yield_now().await;
        if let Some(hook) = hook {
            hook();
        }

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Stall) => std::future::pending().await,
            None => Err(TransportError::new("unscripted request")),
        }
    }
}

pub struct Fixture {
    pub transport: Arc<ScriptedTransport>,
    pub storage: Arc<MemoryStorage>,
    pub tokens: TokenStore,
    pub api: ApiClient,
}

pub fn fixture() -> Fixture {
    fixture_with_storage(Arc::new(MemoryStorage::new()))
}

pub fn fixture_with_storage(storage: Arc<MemoryStorage>) -> Fixture {
    let transport = Arc::new(ScriptedTransport::default());
    let tokens = TokenStore::new(storage.clone());
    let api = ApiClient::new(transport.clone(), tokens.clone());
    Fixture {
        transport,
        storage,
        tokens,
        api,
    }
}

pub fn user_json(id: &str) -> Value {
    json!({
        "_id": id,
        "username": format!("user-{}", id),
        "email": format!("{}@example.com", id),
        "displayName": format!("User {}", id),
        "role": "user"
    })
}

pub fn user_body(id: &str) -> Value {
    json!({ "success": true, "data": user_json(id) })
}

pub fn auth_body(user_id: &str, token: &str, refresh_token: &str) -> Value {
    json!({
        "success": true,
        "data": {
            "user": user_json(user_id),
            "token": token,
            "refreshToken": refresh_token,
            "expiresIn": 900
        }
    })
}

pub fn unauthorized() -> Value {
    json!({
        "success": false,
        "error": { "message": "Invalid token", "code": "INVALID_TOKEN", "statusCode": 401 }
    })
}
