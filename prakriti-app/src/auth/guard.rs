//! Access decisions for protected and admin-only destinations

use super::state::Session;

pub const LOGIN_ROUTE: &str = "/auth/login";
pub const HOME_ROUTE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A session transition is in flight, decide once it settles
    Pending,
    Granted,
    RedirectToLogin,
    /// Signed in, but not allowed here
    RedirectHome,
}

impl Access {
    /// Where to send the user instead, if anywhere
    pub fn redirect(&self) -> Option<&'static str> {
        match self {
            Access::RedirectToLogin => Some(LOGIN_ROUTE),
            Access::RedirectHome => Some(HOME_ROUTE),
            Access::Pending | Access::Granted => None,
        }
    }
}

pub fn require_authenticated(session: &Session) -> Access {
    if session.is_loading {
        Access::Pending
    } else if session.is_authenticated {
        Access::Granted
    } else {
        Access::RedirectToLogin
    }
}

/// Admin access comes from the server-issued role claim only
pub fn require_admin(session: &Session) -> Access {
    match require_authenticated(session) {
        Access::Granted if session.is_admin() => Access::Granted,
        Access::Granted => Access::RedirectHome,
        other => other,
    }
}
