//! # Streamplex
//!
//! A client-side subscription multiplexer for server-streaming controller
//! APIs.
//!
//! ## Core Concepts
//!
//! - **Fingerprints**: Request modifiers each carry a stable key; their keys
//!   identify a logical subscription
//! - **Multiplexing**: At most one physical stream per fingerprint, fanned
//!   out to every subscriber with late joiners replayed from cache
//! - **Merging**: Deltas fold into a snapshot with a pure merge per kind
//! - **Retries**: Transient failures reconnect with exponential backoff;
//!   lost authentication resumes once the client is authenticated again
//! - **Cancellation**: Idempotent handles, optionally confirmed, that also
//!   fire on page teardown
//!
//! ## Example
//!
//! ```ignore
//! use streamplex::{ClientContext, ControllerClient, EventLoop, AuthState};
//! use streamplex::models::{set_page_size, set_stream_updates};
//!
//! let event_loop = EventLoop::new();
//! let auth = Arc::new(AuthState::new());
//! let ctx = ClientContext::new(Arc::new(event_loop.clone()), auth.clone());
//! let client = ControllerClient::new(transport, ctx);
//!
//! let cancel = client.stream_apps(
//!     |apps, error| println!("{} apps, error: {:?}", apps.apps.len(), error),
//!     vec![set_page_size(50), set_stream_updates()],
//! );
//! event_loop.run();
//! cancel.cancel();
//! ```

pub mod auth;
pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod merge;
pub mod models;
pub mod notifications;
pub mod pages;
pub mod runtime;
pub mod stream;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use auth::{with_auth, AuthSignal, AuthState, AuthToken};
pub use cancel::{CancelHandle, CancelOption, Cancellable};
pub use client::{
    CallMetadata, ControllerClient, ControllerTransport, Registries, StreamCallback, StreamKind,
    UnaryCall, UnaryCallback,
};
pub use config::{ClientConfig, RetryPolicy};
pub use context::ClientContext;
pub use error::{ClientError, Result};
pub use notifications::{ErrorHandler, Notice, NoticeId, Notices};
pub use pages::EventPages;
pub use runtime::{
    AlwaysConfirm, Confirm, Emitter, EventLoop, Lifecycle, ListenerHandle, NeverConfirm,
    Scheduler, TimerId,
};
pub use stream::{LocalStream, ResponseStream, RetryPhase, RetryStream};
pub use subscriptions::{MergeFn, SharedStream, StreamMultiplexer, SubscriberId};
pub use types::*;
