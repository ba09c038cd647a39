//! Authentication session client for Prakriti
//!
//! Token issuance, verification, silent refresh and session state, layered
//! as session store → auth service → API client → token store.

pub mod api;
pub mod error;
pub mod guard;
pub mod persistence;
pub mod service;
pub mod session;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiEvent, ApiRequest, Reply};
pub use error::{ApiError, ApiResult, ErrorKind, SessionError};
pub use guard::{require_admin, require_authenticated, Access};
pub use service::{AuthService, Provider};
pub use session::SessionStore;
pub use state::{AuthPhase, Notice, NoticeLevel, Session, SessionEvent, SessionView};
pub use tokens::{TokenPair, TokenStore};
