//! Collaborators shared by every stream and call a client starts.

use crate::auth::AuthSignal;
use crate::config::ClientConfig;
use crate::runtime::{AlwaysConfirm, Confirm, Lifecycle, Scheduler};
use std::sync::Arc;

#[derive(Clone)]
pub struct ClientContext {
    pub scheduler: Arc<dyn Scheduler>,
    pub auth: Arc<dyn AuthSignal>,
    pub confirm: Arc<dyn Confirm>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: ClientConfig,
}

impl ClientContext {
    /// Context with default configuration, a fresh lifecycle and
    /// confirmations that always succeed.
    pub fn new(scheduler: Arc<dyn Scheduler>, auth: Arc<dyn AuthSignal>) -> Self {
        Self {
            scheduler,
            auth,
            confirm: Arc::new(AlwaysConfirm),
            lifecycle: Arc::new(Lifecycle::new()),
            config: ClientConfig::default(),
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<Lifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}
