//! Shared, merged subscriptions to server streams.
//!
//! A [`StreamMultiplexer`] keeps at most one physical stream per request
//! fingerprint:
//! - Subscribers with equal fingerprints share the stream.
//! - Deltas are merged into a cached snapshot that late joiners receive
//!   immediately.
//! - The stream is cancelled when its last subscriber releases it.
//!
//! # Example
//!
//! ```ignore
//! let mux = StreamMultiplexer::new("apps");
//! let (shared, cached) = mux.subscribe(&fingerprint, || (open_stream(), merge_fn));
//! shared.on_data(Arc::new(|snapshot| render(snapshot)));
//! // later
//! shared.cancel();
//! ```

mod manager;
mod types;

pub use manager::StreamMultiplexer;
pub use types::{MergeFn, SharedStream, SubscriberId};
