//! Page teardown hooks and interactive confirmation.

use super::emitter::{Emitter, ListenerHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Asks the user to confirm a destructive action.
pub trait Confirm: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Accepts every confirmation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Declines every confirmation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm(&self, _message: &str) -> bool {
        false
    }
}

/// Hooks run once when the hosting page or process goes away.
pub struct Lifecycle {
    hooks: Emitter<()>,
    torn_down: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            hooks: Emitter::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn on_teardown(&self, hook: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        self.hooks.add_listener(move |_| hook())
    }

    /// Run every registered hook. Later calls do nothing.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let ran = self.hooks.dispatch(&());
        debug!(hooks = ran, "lifecycle teardown");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.listener_count()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
