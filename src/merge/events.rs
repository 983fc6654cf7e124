//! Reconciliation of deployment, job and scale request events.

use crate::models::{Event, StreamDeploymentEventsResponse};
use std::collections::HashMap;

/// Merge a delta of events into the previous snapshot.
///
/// Events are keyed by parent. A later event replaces the kept one only when
/// it is strictly newer; if either lacks a creation time the later one wins.
/// The result is ordered newest first by [`Event::data_time`].
pub fn merge_deployment_events(
    previous: Option<&StreamDeploymentEventsResponse>,
    mut delta: StreamDeploymentEventsResponse,
) -> StreamDeploymentEventsResponse {
    let kept = previous.map(|p| p.events.clone()).unwrap_or_default();
    let incoming = std::mem::take(&mut delta.events);

    let mut events: Vec<Event> = Vec::with_capacity(kept.len() + incoming.len());
    let mut by_parent: HashMap<String, usize> = HashMap::new();

    for event in kept.into_iter().chain(incoming) {
        match by_parent.get(&event.parent) {
            Some(&index) => {
                if supersedes(&events[index], &event) {
                    events[index] = event;
                }
            }
            None => {
                by_parent.insert(event.parent.clone(), events.len());
                events.push(event);
            }
        }
    }

    events.sort_by(|a, b| b.data_time().cmp(&a.data_time()));
    delta.events = events;
    super::inherit_page_meta(
        previous.map(|p| (p.next_page_token.as_str(), p.page_complete)),
        &mut delta.next_page_token,
        &mut delta.page_complete,
    );
    delta
}

fn supersedes(current: &Event, candidate: &Event) -> bool {
    match (current.create_time, candidate.create_time) {
        (Some(current), Some(candidate)) => candidate > current,
        _ => true,
    }
}
