//! # Session Capability
//!
//! The engine does not own authentication: the token and the active tenant
//! are capabilities the host injects. A 401 from any endpoint aborts the
//! cycle; re-authentication is the host's job.

use std::sync::RwLock;

/// Read access to the host's session: the bearer token and the active
/// organization.
pub trait SessionProvider: Send + Sync {
    /// Bearer token, when a user session is active.
    fn token(&self) -> Option<String>;

    /// Active tenant (organization) ID.
    fn organization_id(&self) -> Option<String>;
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    organization_id: Option<String>,
}

/// In-memory session handle. The host updates it on login, logout, and
/// tenant switch; the engine only reads.
#[derive(Debug, Default)]
pub struct SharedSession {
    state: RwLock<SessionState>,
}

impl SharedSession {
    pub fn new() -> Self {
        SharedSession::default()
    }

    pub fn signed_in(token: impl Into<String>, organization_id: impl Into<String>) -> Self {
        let session = SharedSession::new();
        session.sign_in(token, organization_id);
        session
    }

    pub fn sign_in(&self, token: impl Into<String>, organization_id: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.token = Some(token.into());
        state.organization_id = Some(organization_id.into());
    }

    pub fn sign_out(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.token = None;
        state.organization_id = None;
    }

    pub fn set_token(&self, token: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.token = token;
    }

    pub fn set_organization_id(&self, organization_id: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.organization_id = organization_id;
    }
}

impl SessionProvider for SharedSession {
    fn token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .clone()
    }

    fn organization_id(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .organization_id
            .clone()
    }
}
