//! Listener sets.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

struct EmitterInner<T> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> EmitterInner<T> {
    fn remove(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// A set of listeners notified with a payload.
///
/// Dispatch calls a snapshot of the listeners taken when it starts, so a
/// listener may add or remove listeners (itself included) while running.
pub struct Emitter<T> {
    inner: Arc<EmitterInner<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.lock().push((id, Arc::new(listener)));

        let weak: Weak<EmitterInner<T>> = Arc::downgrade(&self.inner);
        ListenerHandle {
            id,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(id);
                }
            })),
        }
    }

    /// Notify every listener. Returns how many were called.
    pub fn dispatch(&self, payload: &T) -> usize {
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one listener. Removal is explicit; dropping the handle
/// leaves the listener in place.
#[must_use = "dropping a ListenerHandle leaves the listener registered"]
pub struct ListenerHandle {
    id: ListenerId,
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({})", self.id.0)
    }
}
