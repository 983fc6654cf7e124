//! Server streams: the transport-facing trait, an in-memory stream and the
//! retrying wrapper.

mod local;
mod retry;

pub use local::LocalStream;
pub use retry::{RetryEffect, RetryInput, RetryMachine, RetryPhase, RetryStream};

use crate::types::Status;
use parking_lot::Mutex;
use std::sync::Arc;

pub type DataHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type StatusHandler = Arc<dyn Fn(&Status) + Send + Sync>;
/// Called once when the stream finishes, with its terminal status if any.
pub type EndHandler = Arc<dyn Fn(Option<&Status>) + Send + Sync>;

/// A server stream as seen by the subscription layers.
///
/// Implementations report the terminal status through the end handlers; a
/// status handler sees it first when there is one. After `cancel` no further
/// events are delivered.
pub trait ResponseStream<T>: Send + Sync {
    fn on_data(&self, handler: DataHandler<T>);
    fn on_status(&self, handler: StatusHandler);
    fn on_end(&self, handler: EndHandler);
    fn cancel(&self);
}

/// Tag for handlers that belong to nobody in particular.
pub(crate) const UNTAGGED: u64 = 0;

/// Handler lists with snapshot dispatch. Each handler carries a tag so that
/// the handlers of one subscriber can be dropped together.
pub(crate) struct Handlers<T> {
    data: Mutex<Vec<(u64, DataHandler<T>)>>,
    status: Mutex<Vec<(u64, StatusHandler)>>,
    end: Mutex<Vec<(u64, EndHandler)>>,
}

impl<T> Handlers<T> {
    pub(crate) fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            status: Mutex::new(Vec::new()),
            end: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_data(&self, tag: u64, handler: DataHandler<T>) {
        self.data.lock().push((tag, handler));
    }

    pub(crate) fn add_status(&self, tag: u64, handler: StatusHandler) {
        self.status.lock().push((tag, handler));
    }

    pub(crate) fn add_end(&self, tag: u64, handler: EndHandler) {
        self.end.lock().push((tag, handler));
    }

    pub(crate) fn remove_tag(&self, tag: u64) {
        self.data.lock().retain(|(t, _)| *t != tag);
        self.status.lock().retain(|(t, _)| *t != tag);
        self.end.lock().retain(|(t, _)| *t != tag);
    }

    pub(crate) fn emit_data(&self, value: &T) {
        let handlers: Vec<DataHandler<T>> =
            self.data.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(value);
        }
    }

    /// Status handlers (when there is a status), then end handlers.
    pub(crate) fn emit_end(&self, status: Option<&Status>) {
        if let Some(status) = status {
            let handlers: Vec<StatusHandler> =
                self.status.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
            for handler in handlers {
                handler(status);
            }
        }
        let handlers: Vec<EndHandler> =
            self.end.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(status);
        }
    }

    pub(crate) fn clear(&self) {
        self.data.lock().clear();
        self.status.lock().clear();
        self.end.lock().clear();
    }
}
