//! User-facing error notices.
//!
//! Errors are filed under the key of the [`ErrorHandler`] that reported
//! them. Each [`Notice`] states what the user may do with it: every notice
//! can be dismissed, and notices reported with a retry action can be retried.

use crate::auth::AuthState;
use crate::error::ClientError;
use crate::runtime::{Emitter, ListenerHandle};
use crate::types::Code;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Message shown for errors the server did not classify.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoticeId(pub u64);

pub type RetryAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct Notice {
    pub id: NoticeId,
    pub key: HandlerKey,
    pub message: String,
    pub error: ClientError,
    pub dismissible: bool,
    retry: Option<RetryAction>,
}

impl Notice {
    pub fn is_retryable(&self) -> bool {
        self.retry.is_some()
    }
}

impl fmt::Debug for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notice")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("message", &self.message)
            .field("dismissible", &self.dismissible)
            .field("retryable", &self.is_retryable())
            .finish()
    }
}

/// Notices on display, newest first within each handler key.
#[derive(Clone, Debug, Default)]
pub struct DisplayedNotices {
    pub shown: Vec<Notice>,
    /// Notices collapsed behind a "show more" control.
    pub hidden: usize,
}

struct NoticesInner {
    /// Filed notices by handler key, keys in first-report order.
    entries: Mutex<Vec<(HandlerKey, Vec<Notice>)>>,
    changes: Emitter<()>,
    auth: Arc<AuthState>,
    max_displayed: usize,
    next_key: AtomicU64,
    next_id: AtomicU64,
}

/// Registry of error notices.
#[derive(Clone)]
pub struct Notices {
    inner: Arc<NoticesInner>,
}

impl Notices {
    pub fn new(auth: Arc<AuthState>, max_displayed: usize) -> Self {
        Self {
            inner: Arc::new(NoticesInner {
                entries: Mutex::new(Vec::new()),
                changes: Emitter::new(),
                auth,
                max_displayed,
                next_key: AtomicU64::new(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// A reporter with its own key.
    pub fn handler(&self) -> ErrorHandler {
        ErrorHandler {
            key: HandlerKey(self.inner.next_key.fetch_add(1, Ordering::SeqCst)),
            notices: self.clone(),
        }
    }

    /// File `error` under `key`.
    ///
    /// Unauthenticated errors go to the auth state instead and file nothing.
    /// Unknown errors are logged and shown with a generic message.
    pub fn report(
        &self,
        key: HandlerKey,
        error: ClientError,
        retry: Option<RetryAction>,
    ) -> Option<NoticeId> {
        let message = match error.code() {
            Code::Unauthenticated => {
                if let Err(unhandled) = self.inner.auth.handle_auth_error(error) {
                    warn!(error = %unhandled, "auth error with no listener");
                }
                return None;
            }
            Code::Unknown => {
                error!(error = %error, "unknown error");
                GENERIC_ERROR_MESSAGE.to_string()
            }
            _ => match &error {
                ClientError::Status { message, .. } => message.clone(),
                other => other.to_string(),
            },
        };

        let id = NoticeId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let notice = Notice {
            id,
            key,
            message,
            error,
            dismissible: true,
            retry,
        };

        {
            let mut entries = self.inner.entries.lock();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, notices)) => notices.insert(0, notice),
                None => entries.push((key, vec![notice])),
            }
        }
        self.inner.changes.dispatch(&());
        Some(id)
    }

    /// Remove a notice. Returns false when it is already gone.
    pub fn dismiss(&self, id: NoticeId) -> bool {
        self.take(id).is_some()
    }

    /// Dismiss a retryable notice and run its retry action.
    pub fn retry(&self, id: NoticeId) -> bool {
        let retryable = self
            .inner
            .entries
            .lock()
            .iter()
            .flat_map(|(_, notices)| notices.iter())
            .any(|notice| notice.id == id && notice.is_retryable());
        if !retryable {
            return false;
        }
        match self.take(id).and_then(|notice| notice.retry) {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    fn take(&self, id: NoticeId) -> Option<Notice> {
        let removed = {
            let mut entries = self.inner.entries.lock();
            entries.iter_mut().find_map(|(_, notices)| {
                let index = notices.iter().position(|notice| notice.id == id)?;
                Some(notices.remove(index))
            })
        };
        if removed.is_some() {
            self.inner.changes.dispatch(&());
        }
        removed
    }

    /// Every filed notice.
    pub fn list(&self) -> Vec<Notice> {
        self.inner
            .entries
            .lock()
            .iter()
            .flat_map(|(_, notices)| notices.iter().cloned())
            .collect()
    }

    pub fn displayed(&self) -> DisplayedNotices {
        let mut shown = self.list();
        let hidden = shown.len().saturating_sub(self.inner.max_displayed);
        shown.truncate(self.inner.max_displayed);
        DisplayedNotices { shown, hidden }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(_, notices)| notices.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_change(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        self.inner.changes.add_listener(move |_| listener())
    }
}

/// Reports errors under one key.
#[derive(Clone)]
pub struct ErrorHandler {
    key: HandlerKey,
    notices: Notices,
}

impl ErrorHandler {
    pub fn key(&self) -> HandlerKey {
        self.key
    }

    pub fn handle(&self, error: ClientError) -> Option<NoticeId> {
        self.notices.report(self.key, error, None)
    }

    pub fn handle_with_retry(
        &self,
        error: ClientError,
        retry: impl Fn() + Send + Sync + 'static,
    ) -> Option<NoticeId> {
        self.notices.report(self.key, error, Some(Arc::new(retry)))
    }
}
