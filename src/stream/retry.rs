//! Reconnecting server streams.
//!
//! [`RetryMachine`] holds the reconnection policy as an explicit transition
//! table; [`RetryStream`] drives it with real streams, timers and auth
//! listeners.
//!
//! ```text
//! Idle --Start--> Attempting
//! Attempting --Ended(retriable, budget left)--> Backoff --BackoffElapsed--> Attempting
//! Attempting --Ended(unauthenticated)--> WaitingForAuth --Authenticated--> Attempting
//! Attempting --Ended(other)--> Ended
//! any --Cancel--> Cancelled
//! ```

use super::{DataHandler, EndHandler, Handlers, ResponseStream, StatusHandler, UNTAGGED};
use crate::auth::AuthSignal;
use crate::config::RetryPolicy;
use crate::runtime::{ListenerHandle, Scheduler, TimerId};
use crate::types::{Code, Status};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Attempting,
    Backoff,
    WaitingForAuth,
    Ended,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryInput {
    Start,
    /// The current attempt finished with this status.
    Ended(Option<Status>),
    BackoffElapsed,
    Authenticated,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryEffect {
    /// Open a new underlying stream.
    Connect,
    ScheduleRetry(Duration),
    /// Wait for the authenticated signal.
    AwaitAuth,
    /// Deliver the terminal status and end downstream.
    Surface(Option<Status>),
    /// Drop timers and listeners and cancel the current stream.
    Teardown,
}

pub struct RetryMachine {
    policy: RetryPolicy,
    phase: RetryPhase,
    attempt: u32,
    backoff: Duration,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = policy.base_backoff();
        Self {
            policy,
            phase: RetryPhase::Idle,
            attempt: 0,
            backoff,
        }
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Zero-based index of the current attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn step(&mut self, input: RetryInput) -> Vec<RetryEffect> {
        use RetryPhase::*;

        match (self.phase, input) {
            (Cancelled, input) => {
                trace!(?input, "retry input after cancel");
                Vec::new()
            }
            (_, RetryInput::Cancel) => {
                self.phase = Cancelled;
                vec![RetryEffect::Teardown]
            }
            (Idle, RetryInput::Start) => {
                self.phase = Attempting;
                vec![RetryEffect::Connect]
            }
            (Attempting, RetryInput::Ended(status)) => self.on_attempt_end(status),
            (Backoff, RetryInput::BackoffElapsed) | (WaitingForAuth, RetryInput::Authenticated) => {
                self.attempt += 1;
                self.phase = Attempting;
                vec![RetryEffect::Connect]
            }
            (phase, input) => {
                trace!(?phase, ?input, "ignored retry input");
                Vec::new()
            }
        }
    }

    fn on_attempt_end(&mut self, status: Option<Status>) -> Vec<RetryEffect> {
        let code = status.as_ref().map(|s| s.code);
        let retriable = code.is_some_and(Code::is_retriable);

        if retriable && self.attempt + 1 < self.policy.max_attempts {
            let delay = self.backoff;
            self.backoff = delay.saturating_mul(2);
            self.phase = RetryPhase::Backoff;
            return vec![RetryEffect::ScheduleRetry(delay)];
        }

        if code.is_some_and(Code::is_unauthenticated) {
            self.phase = RetryPhase::WaitingForAuth;
            return vec![RetryEffect::AwaitAuth, RetryEffect::Surface(status)];
        }

        if retriable {
            warn!(attempts = self.attempt + 1, "retry budget exhausted");
        } else if let Some(status) = status.as_ref().filter(|s| !s.is_ok()) {
            warn!(code = %status.code, details = %status.details, "stream ended with error");
        }
        self.phase = RetryPhase::Ended;
        vec![RetryEffect::Surface(status)]
    }
}

type InitFn<T> = Box<dyn Fn() -> Arc<dyn ResponseStream<T>> + Send + Sync>;

struct RetryInner<T> {
    init: InitFn<T>,
    machine: Mutex<RetryMachine>,
    handlers: Handlers<T>,
    current: Mutex<Option<Arc<dyn ResponseStream<T>>>>,
    /// Bumped on every connect; events from older attempts are ignored.
    generation: AtomicU64,
    timer: Mutex<Option<TimerId>>,
    auth_listener: Mutex<Option<ListenerHandle>>,
    scheduler: Arc<dyn Scheduler>,
    auth: Arc<dyn AuthSignal>,
}

impl<T: Send + Sync + 'static> RetryInner<T> {
    fn apply(self: &Arc<Self>, input: RetryInput) {
        let effects = self.machine.lock().step(input);
        for effect in effects {
            match effect {
                RetryEffect::Connect => self.connect(),
                RetryEffect::ScheduleRetry(delay) => self.schedule_retry(delay),
                RetryEffect::AwaitAuth => self.await_auth(),
                RetryEffect::Surface(status) => self.handlers.emit_end(status.as_ref()),
                RetryEffect::Teardown => self.teardown(),
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn connect(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stream = (self.init)();

        let weak: Weak<Self> = Arc::downgrade(self);
        stream.on_data(Arc::new(move |value: &T| {
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(generation) {
                    inner.handlers.emit_data(value);
                }
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        stream.on_end(Arc::new(move |status: Option<&Status>| {
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(generation) {
                    inner.apply(RetryInput::Ended(status.cloned()));
                }
            }
        }));

        *self.current.lock() = Some(stream);
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let attempt = self.machine.lock().attempt();
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling stream retry");

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.timer.lock().take();
                    inner.apply(RetryInput::BackoffElapsed);
                }
            }),
        );
        *self.timer.lock() = Some(id);
    }

    fn await_auth(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener = self.auth.on_auth_change(Arc::new(move |authenticated| {
            if !authenticated {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                let listener = inner.auth_listener.lock().take();
                if let Some(listener) = listener {
                    listener.remove();
                }
                info!("authenticated, resuming stream");
                inner.apply(RetryInput::Authenticated);
            }
        }));

        let previous = self.auth_listener.lock().replace(listener);
        if let Some(previous) = previous {
            previous.remove();
        }
    }

    fn teardown(&self) {
        let listener = self.auth_listener.lock().take();
        if let Some(listener) = listener {
            listener.remove();
        }
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            self.scheduler.cancel(timer);
        }
        let current = self.current.lock().take();
        if let Some(stream) = current {
            stream.cancel();
        }
    }
}

impl<T> Drop for RetryInner<T> {
    fn drop(&mut self) {
        if let Some(listener) = self.auth_listener.get_mut().take() {
            listener.remove();
        }
        if let Some(timer) = self.timer.get_mut().take() {
            self.scheduler.cancel(timer);
        }
    }
}

/// A stream that reconnects on transient failure.
///
/// `init` opens one attempt. Handlers registered on the retry stream stay
/// attached across reconnects. Retriable statuses (unknown, unavailable)
/// reconnect after an exponential backoff until the attempt budget is spent.
/// An unauthenticated status is surfaced and also arms a one-shot resume
/// that reconnects once the client is authenticated again.
pub struct RetryStream<T> {
    inner: Arc<RetryInner<T>>,
}

impl<T: Send + Sync + 'static> RetryStream<T> {
    /// Open the first attempt immediately.
    pub fn start(
        init: impl Fn() -> Arc<dyn ResponseStream<T>> + Send + Sync + 'static,
        policy: RetryPolicy,
        scheduler: Arc<dyn Scheduler>,
        auth: Arc<dyn AuthSignal>,
    ) -> Self {
        let inner = Arc::new(RetryInner {
            init: Box::new(init),
            machine: Mutex::new(RetryMachine::new(policy)),
            handlers: Handlers::new(),
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
            auth_listener: Mutex::new(None),
            scheduler,
            auth,
        });
        inner.apply(RetryInput::Start);
        Self { inner }
    }

    pub fn phase(&self) -> RetryPhase {
        self.inner.machine.lock().phase()
    }

    pub fn attempt(&self) -> u32 {
        self.inner.machine.lock().attempt()
    }
}

impl<T: Send + Sync + 'static> ResponseStream<T> for RetryStream<T> {
    fn on_data(&self, handler: DataHandler<T>) {
        self.inner.handlers.add_data(UNTAGGED, handler);
    }

    fn on_status(&self, handler: StatusHandler) {
        self.inner.handlers.add_status(UNTAGGED, handler);
    }

    fn on_end(&self, handler: EndHandler) {
        self.inner.handlers.add_end(UNTAGGED, handler);
    }

    fn cancel(&self) {
        self.inner.apply(RetryInput::Cancel);
    }
}
