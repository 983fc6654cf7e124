//! Shared fixtures: an in-memory controller transport and a client wired to
//! a manual-clock event loop.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamplex::models::{
    App, CreateDeploymentRequest, CreateReleaseRequest, CreateScaleRequest, ExpandedDeployment,
    Release, ScaleRequest, StreamAppsRequest, StreamAppsResponse, StreamDeploymentEventsRequest,
    StreamDeploymentEventsResponse, StreamDeploymentsRequest, StreamDeploymentsResponse,
    StreamReleasesRequest, StreamReleasesResponse, StreamScalesRequest, StreamScalesResponse,
    UpdateAppRequest,
};
use streamplex::{
    AlwaysConfirm, AuthState, AuthToken, CallMetadata, ClientContext, ClientError, Code, Confirm,
    ControllerClient, ControllerTransport, EventLoop, Lifecycle, LocalStream, ResponseStream,
    Status, UnaryCall, UnaryCallback,
};

/// Streams opened for one RPC, in call order.
pub struct Calls<Req, T> {
    opened: Mutex<Vec<(Req, CallMetadata, Arc<LocalStream<T>>)>>,
}

impl<Req: Clone, T: Send + Sync + 'static> Calls<Req, T> {
    fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
        }
    }

    fn open(&self, request: Req, metadata: CallMetadata) -> Arc<dyn ResponseStream<T>> {
        let stream = Arc::new(LocalStream::new());
        self.opened
            .lock()
            .push((request, metadata, Arc::clone(&stream)));
        stream
    }

    pub fn count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn stream(&self, index: usize) -> Arc<LocalStream<T>> {
        Arc::clone(&self.opened.lock()[index].2)
    }

    pub fn last(&self) -> Arc<LocalStream<T>> {
        let opened = self.opened.lock();
        Arc::clone(&opened[opened.len() - 1].2)
    }

    pub fn request(&self, index: usize) -> Req {
        self.opened.lock()[index].0.clone()
    }

    pub fn metadata(&self, index: usize) -> CallMetadata {
        self.opened.lock()[index].1.clone()
    }
}

#[derive(Default)]
pub struct FakeCall {
    cancels: AtomicUsize,
}

impl FakeCall {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl UnaryCall for FakeCall {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Unary calls awaiting completion, in call order.
pub struct Unary<Req, R> {
    calls: Mutex<Vec<(Req, Option<UnaryCallback<R>>, Arc<FakeCall>)>>,
}

impl<Req: Clone, R> Unary<Req, R> {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn start(&self, request: Req, done: UnaryCallback<R>) -> Arc<dyn UnaryCall> {
        let call = Arc::new(FakeCall::default());
        self.calls
            .lock()
            .push((request, Some(done), Arc::clone(&call)));
        call
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn request(&self, index: usize) -> Req {
        self.calls.lock()[index].0.clone()
    }

    pub fn call(&self, index: usize) -> Arc<FakeCall> {
        Arc::clone(&self.calls.lock()[index].2)
    }

    pub fn complete(&self, index: usize, result: Result<R, Status>) {
        let done = self.calls.lock()[index].1.take();
        if let Some(done) = done {
            done(result);
        }
    }
}

pub struct FakeTransport {
    pub apps: Calls<StreamAppsRequest, StreamAppsResponse>,
    pub releases: Calls<StreamReleasesRequest, StreamReleasesResponse>,
    pub scales: Calls<StreamScalesRequest, StreamScalesResponse>,
    pub deployments: Calls<StreamDeploymentsRequest, StreamDeploymentsResponse>,
    pub events: Calls<StreamDeploymentEventsRequest, StreamDeploymentEventsResponse>,
    pub created_deployments: Calls<CreateDeploymentRequest, ExpandedDeployment>,
    pub app_updates: Unary<UpdateAppRequest, App>,
    pub scale_creates: Unary<CreateScaleRequest, ScaleRequest>,
    pub release_creates: Unary<CreateReleaseRequest, Release>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            apps: Calls::new(),
            releases: Calls::new(),
            scales: Calls::new(),
            deployments: Calls::new(),
            events: Calls::new(),
            created_deployments: Calls::new(),
            app_updates: Unary::new(),
            scale_creates: Unary::new(),
            release_creates: Unary::new(),
        }
    }
}

impl ControllerTransport for FakeTransport {
    fn stream_apps(
        &self,
        request: StreamAppsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamAppsResponse>> {
        self.apps.open(request, metadata)
    }

    fn stream_releases(
        &self,
        request: StreamReleasesRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamReleasesResponse>> {
        self.releases.open(request, metadata)
    }

    fn stream_scales(
        &self,
        request: StreamScalesRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamScalesResponse>> {
        self.scales.open(request, metadata)
    }

    fn stream_deployments(
        &self,
        request: StreamDeploymentsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamDeploymentsResponse>> {
        self.deployments.open(request, metadata)
    }

    fn stream_deployment_events(
        &self,
        request: StreamDeploymentEventsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamDeploymentEventsResponse>> {
        self.events.open(request, metadata)
    }

    fn update_app(
        &self,
        request: UpdateAppRequest,
        _metadata: CallMetadata,
        done: UnaryCallback<App>,
    ) -> Arc<dyn UnaryCall> {
        self.app_updates.start(request, done)
    }

    fn create_scale(
        &self,
        request: CreateScaleRequest,
        _metadata: CallMetadata,
        done: UnaryCallback<ScaleRequest>,
    ) -> Arc<dyn UnaryCall> {
        self.scale_creates.start(request, done)
    }

    fn create_release(
        &self,
        request: CreateReleaseRequest,
        _metadata: CallMetadata,
        done: UnaryCallback<Release>,
    ) -> Arc<dyn UnaryCall> {
        self.release_creates.start(request, done)
    }

    fn create_deployment(
        &self,
        request: CreateDeploymentRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<ExpandedDeployment>> {
        self.created_deployments.open(request, metadata)
    }
}

pub struct Harness {
    pub event_loop: EventLoop,
    pub auth: Arc<AuthState>,
    pub lifecycle: Arc<Lifecycle>,
    pub transport: Arc<FakeTransport>,
    pub client: Arc<ControllerClient>,
}

pub fn harness() -> Harness {
    build(true, Arc::new(AlwaysConfirm))
}

pub fn unauthenticated_harness() -> Harness {
    build(false, Arc::new(AlwaysConfirm))
}

pub fn harness_with_confirm(confirm: Arc<dyn Confirm>) -> Harness {
    build(true, confirm)
}

/// Route client logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn build(authenticated: bool, confirm: Arc<dyn Confirm>) -> Harness {
    init_tracing();
    let event_loop = EventLoop::manual();
    let auth = Arc::new(if authenticated {
        AuthState::with_token(AuthToken::bearer("token-1"))
    } else {
        AuthState::new()
    });
    let lifecycle = Arc::new(Lifecycle::new());
    let transport = Arc::new(FakeTransport::new());

    let ctx = ClientContext::new(Arc::new(event_loop.clone()), auth.clone())
        .with_confirm(confirm)
        .with_lifecycle(Arc::clone(&lifecycle));
    let client = Arc::new(ControllerClient::new(transport.clone(), ctx));

    Harness {
        event_loop,
        auth,
        lifecycle,
        transport,
        client,
    }
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub fn status(code: Code) -> Status {
    Status::new(code, format!("{code}"))
}

pub fn apps_response(apps: &[(&str, &str)]) -> StreamAppsResponse {
    StreamAppsResponse {
        apps: apps
            .iter()
            .map(|(name, display)| App::new(*name, *display))
            .collect(),
        ..Default::default()
    }
}

/// Everything a stream callback was called with.
pub type Seen<T> = Arc<Mutex<Vec<(T, Option<ClientError>)>>>;

pub fn recorder<T: Clone + Send + 'static>() -> (
    Seen<T>,
    impl Fn(&T, Option<&ClientError>) + Send + Sync + 'static,
) {
    let seen: Seen<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &T, error: Option<&ClientError>| {
        sink.lock().push((value.clone(), error.cloned()))
    })
}

pub fn display_names(response: &StreamAppsResponse) -> Vec<String> {
    response
        .apps
        .iter()
        .map(|app| app.display_name.clone())
        .collect()
}
