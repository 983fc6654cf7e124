//! Deferring work until the client is authenticated.

use super::AuthSignal;
use crate::cancel::CancelHandle;
use crate::runtime::ListenerHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

type StartFn = Box<dyn FnOnce() -> CancelHandle + Send>;

#[derive(Default)]
struct GateState {
    cancelled: bool,
    start: Option<StartFn>,
    started: Option<CancelHandle>,
    listener: Option<ListenerHandle>,
}

struct Gate {
    state: Mutex<GateState>,
}

impl Gate {
    fn open(&self) {
        let (start, listener) = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            (state.start.take(), state.listener.take())
        };
        if let Some(listener) = listener {
            listener.remove();
        }
        let Some(start) = start else {
            return;
        };

        debug!("authenticated, starting deferred work");
        let handle = start();

        let mut state = self.state.lock();
        if state.cancelled {
            drop(state);
            handle.force_cancel();
        } else {
            state.started = Some(handle);
        }
    }

    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(started) = state.started.clone() {
            drop(state);
            started.cancel();
            return started.is_cancelled();
        }
        state.cancelled = true;
        state.start = None;
        let listener = state.listener.take();
        drop(state);

        if let Some(listener) = listener {
            listener.remove();
        }
        true
    }
}

/// Run `start` once the client is authenticated.
///
/// When already authenticated `start` runs immediately and its handle is
/// returned as is. Otherwise a one-shot listener waits for the
/// authenticated signal. Cancelling the returned handle before that
/// guarantees `start` never runs; afterwards it forwards to the handle
/// `start` produced.
pub fn with_auth<F>(auth: &Arc<dyn AuthSignal>, start: F) -> CancelHandle
where
    F: FnOnce() -> CancelHandle + Send + 'static,
{
    if auth.is_authenticated() {
        return start();
    }

    let gate = Arc::new(Gate {
        state: Mutex::new(GateState {
            start: Some(Box::new(start)),
            ..Default::default()
        }),
    });

    let listening = Arc::clone(&gate);
    let listener = auth.on_auth_change(Arc::new(move |authenticated| {
        if authenticated {
            listening.open();
        }
    }));

    {
        let mut state = gate.state.lock();
        if state.start.is_some() {
            state.listener = Some(listener);
        } else {
            drop(state);
            listener.remove();
        }
    }

    CancelHandle::from_attempt(move || gate.cancel())
}
