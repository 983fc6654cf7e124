//! Stream multiplexer: one physical stream per fingerprint, fanned out to
//! every subscriber.

use super::types::{MergeFn, Registration, SharedStream, SubscriberId};
use crate::models::Fingerprint;
use crate::stream::ResponseStream;
use crate::types::Status;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

type Table<T> = RwLock<HashMap<Fingerprint, Arc<Registration<T>>>>;

/// Shares streams of one kind between subscribers with equal fingerprints.
///
/// The first subscriber of a fingerprint opens the stream through its
/// factory; later subscribers join it and get the cached snapshot back. Every
/// delta is merged into the snapshot and the result fanned out to all current
/// subscribers. The stream is cancelled when the last subscriber releases it,
/// and the registration is dropped as soon as the stream ends for good. An
/// unauthenticated end leaves it in place for the resumed stream.
pub struct StreamMultiplexer<T> {
    kind: &'static str,
    /// Live registrations by fingerprint.
    table: Arc<Table<T>>,
    /// Counter for generating subscriber IDs.
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> StreamMultiplexer<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            table: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Join or open the stream for `fingerprint`.
    ///
    /// `factory` runs only when no live registration exists. The returned
    /// snapshot is the current merged state of an existing registration.
    pub fn subscribe<F>(
        &self,
        fingerprint: &Fingerprint,
        factory: F,
    ) -> (Arc<SharedStream<T>>, Option<Arc<T>>)
    where
        F: FnOnce() -> (Arc<dyn ResponseStream<T>>, MergeFn<T>),
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let (registration, created, snapshot) = {
            let mut table = self.table.write();
            match table.get(fingerprint) {
                Some(existing) => {
                    let mut state = existing.state.lock();
                    state.ref_count += 1;
                    let snapshot = state.snapshot.clone();
                    drop(state);
                    (Arc::clone(existing), false, snapshot)
                }
                None => {
                    let registration = Arc::new(Registration::new(fingerprint.clone()));
                    table.insert(fingerprint.clone(), Arc::clone(&registration));
                    (registration, true, None)
                }
            }
        };

        if created {
            debug!(kind = self.kind, fingerprint = %fingerprint.short_id(), "opening shared stream");
            let (stream, merge) = factory();
            self.wire(&registration, stream, merge);
        } else {
            debug!(
                kind = self.kind,
                fingerprint = %fingerprint.short_id(),
                cached = snapshot.is_some(),
                "joining shared stream"
            );
        }

        let shared = Arc::new(SharedStream {
            id,
            registration,
            released: AtomicBool::new(false),
            release: Box::new(self.releaser()),
        });
        (shared, snapshot)
    }

    fn wire(
        &self,
        registration: &Arc<Registration<T>>,
        stream: Arc<dyn ResponseStream<T>>,
        merge: MergeFn<T>,
    ) {
        {
            let mut state = registration.state.lock();
            state.merge = Some(merge);
            state.stream = Some(Arc::clone(&stream));
        }

        let weak: Weak<Registration<T>> = Arc::downgrade(registration);
        stream.on_data(Arc::new(move |delta: &T| {
            let Some(registration) = weak.upgrade() else {
                return;
            };
            if let Some(merged) = registration.merge(delta) {
                registration.handlers.emit_data(&merged);
            }
        }));

        let weak: Weak<Registration<T>> = Arc::downgrade(registration);
        let table = Arc::downgrade(&self.table);
        let kind = self.kind;
        stream.on_end(Arc::new(move |status: Option<&Status>| {
            let Some(registration) = weak.upgrade() else {
                return;
            };
            // An unauthenticated end is resumed once the client signs in
            // again. The registration stays live meanwhile: joiners share
            // it and the last release still cancels the stream.
            let resumable = status.is_some_and(|s| s.code.is_unauthenticated());
            debug!(
                kind,
                fingerprint = %registration.fingerprint.short_id(),
                status = ?status.map(|s| s.code),
                resumable,
                "shared stream ended"
            );
            if resumable {
                registration.handlers.emit_end(status);
                return;
            }

            {
                let mut state = registration.state.lock();
                state.ended = true;
                state.snapshot = None;
            }
            if let Some(table) = table.upgrade() {
                detach(&table, &registration);
            }
            registration.handlers.emit_end(status);
            registration.handlers.clear();
        }));
    }

    fn releaser(&self) -> impl Fn(&Arc<Registration<T>>) + Send + Sync + 'static {
        let table = Arc::downgrade(&self.table);
        let kind = self.kind;
        move |registration: &Arc<Registration<T>>| {
            let stream = {
                let mut state = registration.state.lock();
                if state.ended {
                    return;
                }
                state.ref_count = state.ref_count.saturating_sub(1);
                if state.ref_count > 0 {
                    return;
                }
                state.ended = true;
                state.snapshot = None;
                state.stream.take()
            };
            if let Some(table) = table.upgrade() {
                detach(&table, registration);
            }
            debug!(kind, fingerprint = %registration.fingerprint.short_id(), "closing shared stream");
            registration.handlers.clear();
            if let Some(stream) = stream {
                stream.cancel();
            }
        }
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.table.read().len()
    }

    /// Subscribers of the live registration for `fingerprint`.
    pub fn ref_count(&self, fingerprint: &Fingerprint) -> usize {
        self.table
            .read()
            .get(fingerprint)
            .map(|registration| registration.state.lock().ref_count)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        self.table
            .read()
            .get(fingerprint)
            .and_then(|registration| registration.state.lock().snapshot.clone())
    }
}

/// Remove `registration` from the table unless a newer one took its place.
fn detach<T>(table: &Table<T>, registration: &Arc<Registration<T>>) {
    let mut table = table.write();
    let current = table
        .get(&registration.fingerprint)
        .is_some_and(|existing| Arc::ptr_eq(existing, registration));
    if current {
        table.remove(&registration.fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::LocalStream;
    use crate::types::Code;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    type Numbers = Vec<u32>;

    fn concat() -> MergeFn<Numbers> {
        Arc::new(|prev: Option<&Numbers>, delta: Numbers| {
            let mut merged = prev.cloned().unwrap_or_default();
            merged.extend(delta);
            merged
        })
    }

    struct Harness {
        mux: StreamMultiplexer<Numbers>,
        streams: Mutex<Vec<Arc<LocalStream<Numbers>>>>,
        opened: AtomicUsize,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                mux: StreamMultiplexer::new("numbers"),
                streams: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
            }
        }

        fn subscribe(&self, key: &str) -> (Arc<SharedStream<Numbers>>, Option<Arc<Numbers>>) {
            self.mux.subscribe(&Fingerprint::new(key), || {
                self.opened.fetch_add(1, Ordering::SeqCst);
                let stream: Arc<LocalStream<Numbers>> = Arc::new(LocalStream::new());
                self.streams.lock().push(Arc::clone(&stream));
                (stream as Arc<dyn ResponseStream<Numbers>>, concat())
            })
        }

        fn stream(&self, index: usize) -> Arc<LocalStream<Numbers>> {
            Arc::clone(&self.streams.lock()[index])
        }
    }

    fn collect(shared: &SharedStream<Numbers>) -> Arc<Mutex<Vec<Numbers>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        shared.on_data(Arc::new(move |v: &Numbers| s.lock().push(v.clone())));
        seen
    }

    #[test]
    fn test_equal_fingerprints_share_one_stream() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        let (b, _) = h.subscribe("k");
        let (_c, _) = h.subscribe("other");

        assert_eq!(h.opened.load(Ordering::SeqCst), 2);
        assert_eq!(h.mux.registration_count(), 2);

        let seen_a = collect(&a);
        let seen_b = collect(&b);
        h.stream(0).push(vec![1]);
        h.stream(0).push(vec![2]);

        assert_eq!(*seen_a.lock(), vec![vec![1], vec![1, 2]]);
        assert_eq!(*seen_b.lock(), *seen_a.lock());
    }

    #[test]
    fn test_late_joiner_gets_snapshot() {
        let h = Harness::new();
        let (_a, first) = h.subscribe("k");
        assert!(first.is_none());
        h.stream(0).push(vec![7]);

        let (_b, snapshot) = h.subscribe("k");
        assert_eq!(snapshot.as_deref(), Some(&vec![7]));
    }

    #[test]
    fn test_last_release_cancels_stream() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        let (b, _) = h.subscribe("k");
        let fp = a.fingerprint().clone();
        assert_eq!(h.mux.ref_count(&fp), 2);

        a.cancel();
        a.cancel();
        assert!(!h.stream(0).is_cancelled());
        assert_eq!(h.mux.ref_count(&fp), 1);

        b.cancel();
        assert!(h.stream(0).is_cancelled());
        assert_eq!(h.mux.registration_count(), 0);
    }

    #[test]
    fn test_released_subscriber_stops_receiving() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        let (b, _) = h.subscribe("k");
        let seen_a = collect(&a);
        let seen_b = collect(&b);

        a.cancel();
        h.stream(0).push(vec![1]);
        assert!(seen_a.lock().is_empty());
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[test]
    fn test_end_detaches_and_late_release_is_noop() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ends);
        a.on_end(Arc::new(move |status: Option<&Status>| {
            assert_eq!(status.map(|s| s.code), Some(Code::NotFound));
            e.fetch_add(1, Ordering::SeqCst);
        }));

        h.stream(0).finish(Some(Status::new(Code::NotFound, "")));
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(h.mux.registration_count(), 0);

        let (_b, snapshot) = h.subscribe("k");
        assert!(snapshot.is_none());
        assert_eq!(h.opened.load(Ordering::SeqCst), 2);

        a.cancel();
        assert!(!h.stream(1).is_cancelled());
        assert_eq!(h.mux.registration_count(), 1);
    }

    #[test]
    fn test_unauthenticated_end_keeps_registration() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ends);
        a.on_end(Arc::new(move |_: Option<&Status>| {
            e.fetch_add(1, Ordering::SeqCst);
        }));
        h.stream(0).push(vec![1]);

        h.stream(0).finish(Some(Status::new(Code::Unauthenticated, "")));
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(h.mux.registration_count(), 1);

        let (b, snapshot) = h.subscribe("k");
        assert_eq!(snapshot.as_deref(), Some(&vec![1]));
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        assert_eq!(h.mux.ref_count(a.fingerprint()), 2);

        a.cancel();
        assert!(!h.stream(0).is_cancelled());
        b.cancel();
        assert!(h.stream(0).is_cancelled());
        assert_eq!(h.mux.registration_count(), 0);
    }

    #[test]
    fn test_dropped_subscriber_is_released() {
        let h = Harness::new();
        let (a, _) = h.subscribe("k");
        drop(a);
        assert!(h.stream(0).is_cancelled());
        assert_eq!(h.mux.registration_count(), 0);
    }
}
