//! Execution primitives: the event loop, timers, listener sets and page
//! lifecycle hooks.
//!
//! Everything above this module is callback driven. Callbacks are invoked
//! without any internal lock held, so they may re-enter the API freely.

mod emitter;
mod event_loop;
mod lifecycle;

pub use emitter::{Emitter, Listener, ListenerHandle, ListenerId};
pub use event_loop::{EventLoop, Scheduler, Task, TimerId};
pub use lifecycle::{AlwaysConfirm, Confirm, Lifecycle, NeverConfirm};
