//! Paging through deployment events.

use crate::cancel::CancelHandle;
use crate::client::ControllerClient;
use crate::models::{
    set_name_filters, set_page_token, Event, RequestModifier, StreamDeploymentEventsRequest,
    StreamDeploymentEventsResponse,
};
use crate::runtime::{Emitter, ListenerHandle};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct PageState {
    /// Fetched pages by token, in fetch order.
    pages: Vec<(String, Vec<Event>)>,
    requested: HashSet<String>,
    next_page_token: Option<String>,
    in_flight: usize,
}

impl PageState {
    fn record(&mut self, token: &str, response: &StreamDeploymentEventsResponse) {
        self.next_page_token = Some(response.next_page_token.clone()).filter(|t| !t.is_empty());
        match self.pages.iter_mut().find(|(t, _)| t == token) {
            Some((_, events)) => *events = response.events.clone(),
            None => self.pages.push((token.to_string(), response.events.clone())),
        }
    }
}

/// Older pages of an app's deployment events.
///
/// The first page comes from the caller's own subscription; feed its
/// `next_page_token` in with [`EventPages::set_next_page_token`]. Each
/// token is fetched at most once. Dropping the pager cancels its page
/// streams.
pub struct EventPages {
    client: Arc<ControllerClient>,
    app_name: String,
    modifiers: Vec<RequestModifier<StreamDeploymentEventsRequest>>,
    state: Arc<Mutex<PageState>>,
    changes: Emitter<()>,
    handles: Mutex<Vec<CancelHandle>>,
}

impl EventPages {
    pub fn new(
        client: Arc<ControllerClient>,
        app_name: impl Into<String>,
        modifiers: Vec<RequestModifier<StreamDeploymentEventsRequest>>,
    ) -> Self {
        Self {
            client,
            app_name: app_name.into(),
            modifiers,
            state: Arc::new(Mutex::new(PageState::default())),
            changes: Emitter::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn set_next_page_token(&self, token: &str) {
        self.state.lock().next_page_token = Some(token.to_string()).filter(|t| !t.is_empty());
        self.changes.dispatch(&());
    }

    pub fn next_page_token(&self) -> Option<String> {
        self.state.lock().next_page_token.clone()
    }

    /// Fetch the page after the newest one known.
    pub fn fetch_next(&self) -> bool {
        match self.next_page_token() {
            Some(token) => self.fetch_page(&token),
            None => false,
        }
    }

    /// Fetch the page for `token`. Returns false when it was requested
    /// before.
    pub fn fetch_page(&self, token: &str) -> bool {
        {
            let mut state = self.state.lock();
            if !state.requested.insert(token.to_string()) {
                return false;
            }
            state.in_flight += 1;
        }
        debug!(app = %self.app_name, token, "fetching event page");
        self.changes.dispatch(&());

        let state = Arc::clone(&self.state);
        let changes = self.changes.clone();
        let page_token = token.to_string();
        let pending = AtomicBool::new(true);

        let mut modifiers: Vec<RequestModifier<StreamDeploymentEventsRequest>> = vec![
            set_name_filters(&[self.app_name.as_str()]),
            set_page_token(token),
        ];
        modifiers.extend(self.modifiers.iter().cloned());

        let handle = self.client.stream_deployment_events(
            move |response, error| {
                {
                    let mut state = state.lock();
                    if error.is_none() {
                        state.record(&page_token, response);
                    }
                    if pending.swap(false, Ordering::SeqCst) {
                        state.in_flight = state.in_flight.saturating_sub(1);
                    }
                }
                changes.dispatch(&());
            },
            modifiers,
        );
        self.handles.lock().push(handle);
        true
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().in_flight > 0
    }

    /// Tokens of the fetched pages, in fetch order.
    pub fn page_tokens(&self) -> Vec<String> {
        self.state.lock().pages.iter().map(|(t, _)| t.clone()).collect()
    }

    /// `head` followed by the events of every fetched page.
    pub fn all_events(&self, head: &[Event]) -> Vec<Event> {
        let state = self.state.lock();
        head.iter()
            .cloned()
            .chain(state.pages.iter().flat_map(|(_, events)| events.iter().cloned()))
            .collect()
    }

    pub fn on_change(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        self.changes.add_listener(move |_| listener())
    }

    /// Cancel every page stream.
    pub fn close(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.cancel();
        }
    }
}

impl Drop for EventPages {
    fn drop(&mut self) {
        self.close();
    }
}
