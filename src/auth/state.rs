//! In-process authentication state.

use super::{AuthListener, AuthSignal};
use crate::error::{ClientError, Result};
use crate::runtime::{Emitter, ListenerHandle};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds, when the issuer reported one.
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
}

impl AuthToken {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            ..Default::default()
        }
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Current token plus listeners for auth changes and auth failures.
pub struct AuthState {
    token: RwLock<Option<AuthToken>>,
    changes: Emitter<bool>,
    errors: Emitter<ClientError>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            token: RwLock::new(None),
            changes: Emitter::new(),
            errors: Emitter::new(),
        }
    }

    pub fn with_token(token: AuthToken) -> Self {
        let state = Self::new();
        *state.token.write() = Some(token);
        state
    }

    /// Replace the token and notify change listeners with the new flag.
    pub fn set_auth(&self, token: Option<AuthToken>) {
        let authenticated = token.as_ref().is_some_and(|t| !t.access_token.is_empty());
        *self.token.write() = token;
        info!(authenticated, "auth state changed");
        self.changes.dispatch(&authenticated);
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token.read().clone()
    }

    pub fn on_auth_error(
        &self,
        listener: impl Fn(&ClientError) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.errors.add_listener(listener)
    }

    /// Relay an authentication failure to the error listeners. Without
    /// listeners the error is returned to the caller instead.
    pub fn handle_auth_error(&self, error: ClientError) -> Result<()> {
        if self.errors.listener_count() == 0 {
            return Err(error);
        }
        let notified = self.errors.dispatch(&error);
        debug!(listeners = notified, code = %error.code(), "relayed auth error");
        Ok(())
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSignal for AuthState {
    fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .as_ref()
            .is_some_and(|t| !t.access_token.is_empty())
    }

    fn on_auth_change(&self, listener: AuthListener) -> ListenerHandle {
        self.changes.add_listener(move |authenticated| listener(*authenticated))
    }

    fn authorization(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .filter(|t| !t.access_token.is_empty())
            .map(AuthToken::authorization_header)
    }
}
