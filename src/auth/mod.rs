//! Authentication signals consumed by the stream layers.
//!
//! Token acquisition and refresh live outside this crate. Streams only need
//! to know whether a token is present and when that changes.

mod gate;
mod state;

pub use gate::with_auth;
pub use state::{AuthState, AuthToken};

use crate::runtime::ListenerHandle;
use std::sync::Arc;

pub type AuthListener = Arc<dyn Fn(bool) + Send + Sync>;

pub trait AuthSignal: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Register `listener` for authentication changes. It receives the new
    /// authenticated flag.
    fn on_auth_change(&self, listener: AuthListener) -> ListenerHandle;

    /// Value of the `Authorization` header for outgoing calls.
    fn authorization(&self) -> Option<String> {
        None
    }
}
