//! In-memory response stream.

use super::{DataHandler, EndHandler, Handlers, ResponseStream, StatusHandler, UNTAGGED};
use crate::types::Status;
use std::sync::atomic::{AtomicBool, Ordering};

/// A stream fed by the caller.
///
/// Useful for embedding non-network sources and for tests: `push` delivers
/// data, `finish` delivers the terminal status and end. Events after
/// `finish` or `cancel` are dropped.
pub struct LocalStream<T> {
    handlers: Handlers<T>,
    ended: AtomicBool,
    cancelled: AtomicBool,
}

impl<T> LocalStream<T> {
    pub fn new() -> Self {
        Self {
            handlers: Handlers::new(),
            ended: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    fn closed(&self) -> bool {
        self.ended.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst)
    }

    pub fn push(&self, value: T) {
        if self.closed() {
            return;
        }
        self.handlers.emit_data(&value);
    }

    pub fn finish(&self, status: Option<Status>) {
        if self.cancelled.load(Ordering::SeqCst) || self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handlers.emit_end(status.as_ref());
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<T> Default for LocalStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> ResponseStream<T> for LocalStream<T> {
    fn on_data(&self, handler: DataHandler<T>) {
        self.handlers.add_data(UNTAGGED, handler);
    }

    fn on_status(&self, handler: StatusHandler) {
        self.handlers.add_status(UNTAGGED, handler);
    }

    fn on_end(&self, handler: EndHandler) {
        self.handlers.add_end(UNTAGGED, handler);
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.handlers.clear();
        }
    }
}
