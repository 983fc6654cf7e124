//! Registration and per-subscriber handle types.

use crate::models::Fingerprint;
use crate::stream::{DataHandler, EndHandler, Handlers, ResponseStream, StatusHandler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Folds a delta into the previous snapshot.
pub type MergeFn<T> = Arc<dyn Fn(Option<&T>, T) -> T + Send + Sync>;

/// Unique identifier for one subscriber of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

pub(crate) struct RegistrationState<T> {
    pub(crate) ref_count: usize,
    pub(crate) ended: bool,
    /// Last merged snapshot. Empty until the first delta.
    pub(crate) snapshot: Option<Arc<T>>,
    pub(crate) stream: Option<Arc<dyn ResponseStream<T>>>,
    pub(crate) merge: Option<MergeFn<T>>,
}

/// One physical stream shared by every subscriber of a fingerprint.
pub(crate) struct Registration<T> {
    pub(crate) fingerprint: Fingerprint,
    pub(crate) state: Mutex<RegistrationState<T>>,
    pub(crate) handlers: Handlers<T>,
}

impl<T> Registration<T> {
    pub(crate) fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            state: Mutex::new(RegistrationState {
                ref_count: 1,
                ended: false,
                snapshot: None,
                stream: None,
                merge: None,
            }),
            handlers: Handlers::new(),
        }
    }

    /// Merge `delta` into the cached snapshot and return the new snapshot.
    pub(crate) fn merge(&self, delta: &T) -> Option<Arc<T>>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        let merge = state.merge.clone()?;
        let merged = Arc::new(merge(state.snapshot.as_deref(), delta.clone()));
        state.snapshot = Some(Arc::clone(&merged));
        Some(merged)
    }
}

/// A subscriber's view of a shared stream.
///
/// Handlers registered here receive merged snapshots and the terminal
/// status. Cancelling releases this subscriber: its handlers are dropped
/// and the physical stream is cancelled once no subscriber is left.
pub struct SharedStream<T> {
    pub(crate) id: SubscriberId,
    pub(crate) registration: Arc<Registration<T>>,
    pub(crate) released: AtomicBool,
    pub(crate) release: Box<dyn Fn(&Arc<Registration<T>>) + Send + Sync>,
}

impl<T> SharedStream<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.registration.fingerprint
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn release_once(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registration.handlers.remove_tag(self.id.0);
        (self.release)(&self.registration);
    }
}

impl<T: Send + Sync> ResponseStream<T> for SharedStream<T> {
    fn on_data(&self, handler: DataHandler<T>) {
        if !self.is_released() {
            self.registration.handlers.add_data(self.id.0, handler);
        }
    }

    fn on_status(&self, handler: StatusHandler) {
        if !self.is_released() {
            self.registration.handlers.add_status(self.id.0, handler);
        }
    }

    fn on_end(&self, handler: EndHandler) {
        if !self.is_released() {
            self.registration.handlers.add_end(self.id.0, handler);
        }
    }

    fn cancel(&self) {
        self.release_once();
    }
}

impl<T> Drop for SharedStream<T> {
    fn drop(&mut self) {
        self.release_once();
    }
}
