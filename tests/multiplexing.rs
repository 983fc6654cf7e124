//! Stream sharing across subscribers of the controller client.

mod common;

use common::*;
use streamplex::models::{set_page_size, set_stream_updates, Fingerprint, StreamAppsResponse};
use streamplex::{Code, Status};

fn apps_fingerprint() -> Fingerprint {
    Fingerprint::from_modifiers(&[set_page_size::<streamplex::models::StreamAppsRequest>(10)])
}

// --- Sharing ---

#[test]
fn test_equal_modifiers_share_one_stream() {
    let h = harness();
    let (seen_a, cb_a) = recorder::<StreamAppsResponse>();
    let (seen_b, cb_b) = recorder::<StreamAppsResponse>();

    let _a = h.client.stream_apps(cb_a, vec![set_page_size(10)]);
    let _b = h.client.stream_apps(cb_b, vec![set_page_size(10)]);

    assert_eq!(h.transport.apps.count(), 1);
    assert_eq!(h.client.registries().apps.ref_count(&apps_fingerprint()), 2);

    h.transport.apps.stream(0).push(apps_response(&[("apps/a", "a")]));
    assert_eq!(seen_a.lock().len(), 1);
    assert_eq!(seen_b.lock().len(), 1);
    assert_eq!(display_names(&seen_b.lock()[0].0), vec!["a"]);
}

#[test]
fn test_different_modifiers_open_separate_streams() {
    let h = harness();
    let (_, cb_a) = recorder::<StreamAppsResponse>();
    let (_, cb_b) = recorder::<StreamAppsResponse>();

    let _a = h.client.stream_apps(cb_a, vec![set_page_size(10)]);
    let _b = h
        .client
        .stream_apps(cb_b, vec![set_page_size(10), set_stream_updates()]);

    assert_eq!(h.transport.apps.count(), 2);
    assert!(h.transport.apps.request(1).stream_updates);
    assert!(!h.transport.apps.request(0).stream_updates);
}

#[test]
fn test_kinds_never_share_streams() {
    let h = harness();
    let _apps = h.client.stream_apps(|_, _| {}, vec![]);
    let _releases = h.client.stream_releases(|_, _| {}, vec![]);

    assert_eq!(h.transport.apps.count(), 1);
    assert_eq!(h.transport.releases.count(), 1);
    assert_eq!(h.client.registries().apps.registration_count(), 1);
    assert_eq!(h.client.registries().releases.registration_count(), 1);
}

// --- Replay ---

#[test]
fn test_late_joiner_gets_cached_snapshot_synchronously() {
    let h = harness();
    let _first = h.client.stream_apps(|_, _| {}, vec![set_page_size(10)]);
    h.transport
        .apps
        .stream(0)
        .push(apps_response(&[("apps/b", "b"), ("apps/a", "a")]));

    let (seen, cb) = recorder::<StreamAppsResponse>();
    let _late = h.client.stream_apps(cb, vec![set_page_size(10)]);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1.is_none());
    assert_eq!(display_names(&seen[0].0), vec!["a", "b"]);
    assert_eq!(h.transport.apps.count(), 1);
}

#[test]
fn test_deltas_fold_into_snapshot() {
    let h = harness();
    let (seen, cb) = recorder::<StreamAppsResponse>();
    let _handle = h.client.stream_apps(cb, vec![]);

    let stream = h.transport.apps.stream(0);
    stream.push(apps_response(&[("apps/b", "b"), ("apps/a", "a")]));
    stream.push(apps_response(&[("apps/a", "a2"), ("apps/c", "c")]));

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(display_names(&seen[1].0), vec!["a2", "b", "c"]);
}

// --- Teardown ---

#[test]
fn test_stream_cancelled_after_last_release() {
    let h = harness();
    let a = h.client.stream_apps(|_, _| {}, vec![]);
    let b = h.client.stream_apps(|_, _| {}, vec![]);
    let stream = h.transport.apps.stream(0);

    a.cancel();
    assert!(!stream.is_cancelled());
    assert_eq!(h.client.registries().apps.registration_count(), 1);

    b.cancel();
    assert!(stream.is_cancelled());
    assert_eq!(h.client.registries().apps.registration_count(), 0);
}

#[test]
fn test_released_subscriber_stops_receiving() {
    let h = harness();
    let (seen_a, cb_a) = recorder::<StreamAppsResponse>();
    let (seen_b, cb_b) = recorder::<StreamAppsResponse>();
    let a = h.client.stream_apps(cb_a, vec![]);
    let _b = h.client.stream_apps(cb_b, vec![]);

    a.cancel();
    h.transport.apps.stream(0).push(apps_response(&[("apps/a", "a")]));

    assert!(seen_a.lock().is_empty());
    assert_eq!(seen_b.lock().len(), 1);
}

#[test]
fn test_subscribe_after_end_opens_fresh_stream() {
    let h = harness();
    let (seen, cb) = recorder::<StreamAppsResponse>();
    let _first = h.client.stream_apps(cb, vec![]);
    h.transport.apps.stream(0).push(apps_response(&[("apps/a", "a")]));
    h.transport.apps.stream(0).finish(Some(Status::ok()));

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(h.client.registries().apps.registration_count(), 0);

    let (late, cb) = recorder::<StreamAppsResponse>();
    let _second = h.client.stream_apps(cb, vec![]);
    assert_eq!(h.transport.apps.count(), 2);
    assert!(late.lock().is_empty());
}

#[test]
fn test_cancel_after_end_does_not_touch_new_registration() {
    let h = harness();
    let first = h.client.stream_apps(|_, _| {}, vec![]);
    h.transport
        .apps
        .stream(0)
        .finish(Some(status(Code::NotFound)));

    let _second = h.client.stream_apps(|_, _| {}, vec![]);
    first.cancel();

    assert!(!h.transport.apps.stream(1).is_cancelled());
    assert_eq!(h.client.registries().apps.registration_count(), 1);
}

#[test]
fn test_teardown_releases_every_subscription() {
    let h = harness();
    let handles: Vec<_> = (0..3)
        .map(|_| h.client.stream_apps(|_, _| {}, vec![]))
        .collect();

    h.lifecycle.teardown();

    assert!(handles.iter().all(|handle| handle.is_cancelled()));
    assert!(h.transport.apps.stream(0).is_cancelled());
    assert_eq!(h.client.registries().apps.registration_count(), 0);
}
