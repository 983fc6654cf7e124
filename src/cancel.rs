//! Idempotent cancel handles.

use crate::context::ClientContext;
use crate::runtime::{Confirm, ListenerHandle};
use crate::stream::ResponseStream;
use crate::types::Status;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Something that can be cancelled and reports when it ends on its own.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);

    /// Register `handler` to run once the resource completes naturally.
    fn on_end(&self, handler: Arc<dyn Fn() + Send + Sync>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOption {
    /// Ask for interactive confirmation before cancelling.
    ConfirmCancel,
}

/// Runs the cancellation. Returns false when it did not take effect.
type CancelAction = Box<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    teardown: Option<ListenerHandle>,
}

struct CancelInner {
    state: Mutex<CancelState>,
    action: CancelAction,
    confirm: Option<(Arc<dyn Confirm>, String)>,
}

impl CancelInner {
    fn run(&self) {
        {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
        }
        if !(self.action)() {
            self.state.lock().cancelled = false;
            return;
        }
        self.remove_teardown();
    }

    /// The resource finished by itself; no cancel is sent.
    fn mark_ended(&self) {
        {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
        }
        self.remove_teardown();
    }

    fn remove_teardown(&self) {
        let hook = self.state.lock().teardown.take();
        if let Some(hook) = hook {
            hook.remove();
        }
    }
}

/// Handle returned to callers of a stream or call.
///
/// Cancelling is idempotent. A handle created with
/// [`CancelOption::ConfirmCancel`] asks first and stays live when the
/// confirmation is declined. Resource-backed handles also cancel on page
/// teardown, without asking, and become cancelled once the resource ends.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    fn with_action(action: CancelAction, confirm: Option<(Arc<dyn Confirm>, String)>) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                state: Mutex::new(CancelState::default()),
                action,
                confirm,
            }),
        }
    }

    pub fn from_fn(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_action(
            Box::new(move || {
                cancel();
                true
            }),
            None,
        )
    }

    /// Handle whose action may decline; used when cancelling forwards to a
    /// handle that asks for confirmation.
    pub(crate) fn from_attempt(cancel: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::with_action(Box::new(cancel), None)
    }

    /// A handle that does nothing.
    pub fn noop() -> Self {
        Self::from_fn(|| {})
    }

    pub fn for_resource(
        resource: Arc<dyn Cancellable>,
        ctx: &ClientContext,
        options: &[CancelOption],
    ) -> Self {
        let confirm = options
            .contains(&CancelOption::ConfirmCancel)
            .then(|| (Arc::clone(&ctx.confirm), ctx.config.confirm_cancel_message.clone()));

        let target = Arc::clone(&resource);
        let handle = Self::with_action(
            Box::new(move || {
                target.cancel();
                true
            }),
            confirm,
        );

        let inner = Arc::clone(&handle.inner);
        let hook = ctx.lifecycle.on_teardown(move || {
            debug!("cancelling on teardown");
            inner.run();
        });
        handle.inner.state.lock().teardown = Some(hook);

        let weak: Weak<CancelInner> = Arc::downgrade(&handle.inner);
        resource.on_end(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.mark_ended();
            }
        }));

        handle
    }

    pub fn for_stream<T: 'static>(
        stream: Arc<dyn ResponseStream<T>>,
        ctx: &ClientContext,
        options: &[CancelOption],
    ) -> Self {
        let resource = StreamResource {
            stream,
            resumes_on_auth: false,
        };
        Self::for_resource(Arc::new(resource), ctx, options)
    }

    /// Like [`CancelHandle::for_stream`], for a stream that resumes after an
    /// unauthenticated end. Such an end leaves the handle live, so the
    /// resumed stream can still be cancelled through it.
    pub(crate) fn for_resumable_stream<T: 'static>(
        stream: Arc<dyn ResponseStream<T>>,
        ctx: &ClientContext,
        options: &[CancelOption],
    ) -> Self {
        let resource = StreamResource {
            stream,
            resumes_on_auth: true,
        };
        Self::for_resource(Arc::new(resource), ctx, options)
    }

    pub fn cancel(&self) {
        if self.is_cancelled() {
            return;
        }
        if let Some((confirm, message)) = &self.inner.confirm {
            if !confirm.confirm(message) {
                debug!("cancel declined");
                return;
            }
        }
        self.inner.run();
    }

    /// Cancel without asking for confirmation.
    pub(crate) fn force_cancel(&self) {
        self.inner.run();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .field("confirm", &self.inner.confirm.is_some())
            .finish()
    }
}

struct StreamResource<T> {
    stream: Arc<dyn ResponseStream<T>>,
    resumes_on_auth: bool,
}

impl<T: 'static> Cancellable for StreamResource<T> {
    fn cancel(&self) {
        self.stream.cancel();
    }

    fn on_end(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        let resumes_on_auth = self.resumes_on_auth;
        self.stream.on_end(Arc::new(move |status: Option<&Status>| {
            if resumes_on_auth && status.is_some_and(|s| s.code.is_unauthenticated()) {
                return;
            }
            handler();
        }));
    }
}
