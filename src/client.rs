//! Controller client: auth-gated, multiplexed and retried streams plus the
//! write calls.

use crate::auth::{with_auth, AuthSignal};
use crate::cancel::{CancelHandle, CancelOption, Cancellable};
use crate::context::ClientContext;
use crate::error::{ClientError, Result};
use crate::merge::{
    merge_apps, merge_deployment_events, merge_deployments, merge_releases, merge_scales,
};
use crate::models::{
    build_request, App, CreateDeploymentRequest, CreateReleaseRequest, CreateScaleRequest,
    ExpandedDeployment, Fingerprint, Release, RequestModifier, ScaleRequest, StreamAppsRequest,
    StreamAppsResponse, StreamDeploymentEventsRequest, StreamDeploymentEventsResponse,
    StreamDeploymentsRequest, StreamDeploymentsResponse, StreamReleasesRequest,
    StreamReleasesResponse, StreamScalesRequest, StreamScalesResponse, UpdateAppRequest,
};
use crate::runtime::Emitter;
use crate::stream::{ResponseStream, RetryStream};
use crate::subscriptions::{MergeFn, StreamMultiplexer};
use crate::types::Status;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Headers sent with every call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallMetadata {
    /// `Authorization` header value.
    pub authorization: Option<String>,
}

impl CallMetadata {
    pub fn from_auth(auth: &dyn AuthSignal) -> Self {
        Self {
            authorization: auth.authorization(),
        }
    }
}

/// Completion of a unary call.
pub type UnaryCallback<R> = Box<dyn FnOnce(std::result::Result<R, Status>) + Send>;

/// An in-flight unary call.
pub trait UnaryCall: Send + Sync {
    fn cancel(&self);
}

/// The RPC surface of the controller. Encoding and connections belong to the
/// implementation.
pub trait ControllerTransport: Send + Sync {
    fn stream_apps(
        &self,
        request: StreamAppsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamAppsResponse>>;

    fn stream_releases(
        &self,
        request: StreamReleasesRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamReleasesResponse>>;

    fn stream_scales(
        &self,
        request: StreamScalesRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamScalesResponse>>;

    fn stream_deployments(
        &self,
        request: StreamDeploymentsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamDeploymentsResponse>>;

    fn stream_deployment_events(
        &self,
        request: StreamDeploymentEventsRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<StreamDeploymentEventsResponse>>;

    fn update_app(
        &self,
        request: UpdateAppRequest,
        metadata: CallMetadata,
        done: UnaryCallback<App>,
    ) -> Arc<dyn UnaryCall>;

    fn create_scale(
        &self,
        request: CreateScaleRequest,
        metadata: CallMetadata,
        done: UnaryCallback<ScaleRequest>,
    ) -> Arc<dyn UnaryCall>;

    fn create_release(
        &self,
        request: CreateReleaseRequest,
        metadata: CallMetadata,
        done: UnaryCallback<Release>,
    ) -> Arc<dyn UnaryCall>;

    fn create_deployment(
        &self,
        request: CreateDeploymentRequest,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<ExpandedDeployment>>;
}

/// One multiplexer per streamed kind.
///
/// Clients built on the same registries share streams.
pub struct Registries {
    pub apps: StreamMultiplexer<StreamAppsResponse>,
    pub releases: StreamMultiplexer<StreamReleasesResponse>,
    pub scales: StreamMultiplexer<StreamScalesResponse>,
    pub deployments: StreamMultiplexer<StreamDeploymentsResponse>,
    pub deployment_events: StreamMultiplexer<StreamDeploymentEventsResponse>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            apps: StreamMultiplexer::new(StreamAppsResponse::KIND),
            releases: StreamMultiplexer::new(StreamReleasesResponse::KIND),
            scales: StreamMultiplexer::new(StreamScalesResponse::KIND),
            deployments: StreamMultiplexer::new(StreamDeploymentsResponse::KIND),
            deployment_events: StreamMultiplexer::new(StreamDeploymentEventsResponse::KIND),
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

/// A streamed response type and everything needed to subscribe to it.
pub trait StreamKind: Clone + Default + Send + Sync + 'static {
    type Request: Default + Send + Sync + 'static;

    const KIND: &'static str;

    fn merge(previous: Option<&Self>, delta: Self) -> Self;

    fn open(
        transport: &dyn ControllerTransport,
        request: Self::Request,
        metadata: CallMetadata,
    ) -> Arc<dyn ResponseStream<Self>>;

    fn multiplexer(registries: &Registries) -> &StreamMultiplexer<Self>;
}

macro_rules! stream_kind {
    ($response:ty, $request:ty, $kind:literal, $merge:path, $open:ident, $field:ident) => {
        impl StreamKind for $response {
            type Request = $request;

            const KIND: &'static str = $kind;

            fn merge(previous: Option<&Self>, delta: Self) -> Self {
                $merge(previous, delta)
            }

            fn open(
                transport: &dyn ControllerTransport,
                request: Self::Request,
                metadata: CallMetadata,
            ) -> Arc<dyn ResponseStream<Self>> {
                transport.$open(request, metadata)
            }

            fn multiplexer(registries: &Registries) -> &StreamMultiplexer<Self> {
                &registries.$field
            }
        }
    };
}

stream_kind!(StreamAppsResponse, StreamAppsRequest, "streamApps", merge_apps, stream_apps, apps);
stream_kind!(
    StreamReleasesResponse,
    StreamReleasesRequest,
    "streamReleases",
    merge_releases,
    stream_releases,
    releases
);
stream_kind!(
    StreamScalesResponse,
    StreamScalesRequest,
    "streamScales",
    merge_scales,
    stream_scales,
    scales
);
stream_kind!(
    StreamDeploymentsResponse,
    StreamDeploymentsRequest,
    "streamDeployments",
    merge_deployments,
    stream_deployments,
    deployments
);
stream_kind!(
    StreamDeploymentEventsResponse,
    StreamDeploymentEventsRequest,
    "streamDeploymentEvents",
    merge_deployment_events,
    stream_deployment_events,
    deployment_events
);

/// Receives every merged snapshot, or an empty response with the error that
/// ended the stream.
pub type StreamCallback<K> = Arc<dyn Fn(&K, Option<&ClientError>) + Send + Sync>;

pub struct ControllerClient {
    transport: Arc<dyn ControllerTransport>,
    ctx: ClientContext,
    registries: Arc<Registries>,
}

impl ControllerClient {
    pub fn new(transport: Arc<dyn ControllerTransport>, ctx: ClientContext) -> Self {
        Self::with_registries(transport, ctx, Arc::new(Registries::new()))
    }

    pub fn with_registries(
        transport: Arc<dyn ControllerTransport>,
        ctx: ClientContext,
        registries: Arc<Registries>,
    ) -> Self {
        Self {
            transport,
            ctx,
            registries,
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    // --- Streams ---

    pub fn stream_apps(
        &self,
        callback: impl Fn(&StreamAppsResponse, Option<&ClientError>) + Send + Sync + 'static,
        modifiers: Vec<RequestModifier<StreamAppsRequest>>,
    ) -> CancelHandle {
        self.stream::<StreamAppsResponse>(Arc::new(callback), modifiers)
    }

    pub fn stream_releases(
        &self,
        callback: impl Fn(&StreamReleasesResponse, Option<&ClientError>) + Send + Sync + 'static,
        modifiers: Vec<RequestModifier<StreamReleasesRequest>>,
    ) -> CancelHandle {
        self.stream::<StreamReleasesResponse>(Arc::new(callback), modifiers)
    }

    pub fn stream_scales(
        &self,
        callback: impl Fn(&StreamScalesResponse, Option<&ClientError>) + Send + Sync + 'static,
        modifiers: Vec<RequestModifier<StreamScalesRequest>>,
    ) -> CancelHandle {
        self.stream::<StreamScalesResponse>(Arc::new(callback), modifiers)
    }

    pub fn stream_deployments(
        &self,
        callback: impl Fn(&StreamDeploymentsResponse, Option<&ClientError>) + Send + Sync + 'static,
        modifiers: Vec<RequestModifier<StreamDeploymentsRequest>>,
    ) -> CancelHandle {
        self.stream::<StreamDeploymentsResponse>(Arc::new(callback), modifiers)
    }

    pub fn stream_deployment_events(
        &self,
        callback: impl Fn(&StreamDeploymentEventsResponse, Option<&ClientError>)
            + Send
            + Sync
            + 'static,
        modifiers: Vec<RequestModifier<StreamDeploymentEventsRequest>>,
    ) -> CancelHandle {
        self.stream::<StreamDeploymentEventsResponse>(Arc::new(callback), modifiers)
    }

    /// Subscribe to a streamed kind.
    ///
    /// Once authenticated, the subscription joins or opens the shared stream
    /// for the modifiers' fingerprint. A cached snapshot is replayed
    /// synchronously. A non-OK status is reported as an empty response with
    /// the error. A stream that ends without delivering anything reports one
    /// empty response.
    pub fn stream<K: StreamKind>(
        &self,
        callback: StreamCallback<K>,
        modifiers: Vec<RequestModifier<K::Request>>,
    ) -> CancelHandle {
        let transport = Arc::clone(&self.transport);
        let registries = Arc::clone(&self.registries);
        let ctx = self.ctx.clone();

        with_auth(&self.ctx.auth, move || {
            let fingerprint = Fingerprint::from_modifiers(&modifiers);
            debug!(kind = K::KIND, fingerprint = %fingerprint.short_id(), "subscribing");

            let (shared, cached) = K::multiplexer(&registries).subscribe(&fingerprint, || {
                let auth = Arc::clone(&ctx.auth);
                let init = move || {
                    let request = build_request(&modifiers);
                    K::open(transport.as_ref(), request, CallMetadata::from_auth(auth.as_ref()))
                };
                let stream = RetryStream::start(
                    init,
                    ctx.config.retry.clone(),
                    Arc::clone(&ctx.scheduler),
                    Arc::clone(&ctx.auth),
                );
                let merge: MergeFn<K> = Arc::new(|previous: Option<&K>, delta: K| K::merge(previous, delta));
                (Arc::new(stream) as Arc<dyn ResponseStream<K>>, merge)
            });

            let delivered = Arc::new(AtomicBool::new(false));

            let cb = Arc::clone(&callback);
            let seen = Arc::clone(&delivered);
            shared.on_data(Arc::new(move |snapshot: &K| {
                seen.store(true, Ordering::SeqCst);
                cb(snapshot, None);
            }));

            let cb = Arc::clone(&callback);
            let seen = Arc::clone(&delivered);
            shared.on_status(Arc::new(move |status: &Status| {
                if status.is_ok() {
                    return;
                }
                seen.store(true, Ordering::SeqCst);
                let error = ClientError::from_status(status);
                cb(&K::default(), Some(&error));
            }));

            let cb = Arc::clone(&callback);
            let seen = Arc::clone(&delivered);
            shared.on_end(Arc::new(move |_: Option<&Status>| {
                if !seen.swap(true, Ordering::SeqCst) {
                    cb(&K::default(), None);
                }
            }));

            if let Some(snapshot) = cached {
                delivered.store(true, Ordering::SeqCst);
                callback(&snapshot, None);
            }

            CancelHandle::for_resumable_stream(shared as Arc<dyn ResponseStream<K>>, &ctx, &[])
        })
    }

    // --- Writes ---

    pub fn update_app(
        &self,
        app: App,
        callback: impl FnOnce(Result<App>) + Send + 'static,
    ) -> CancelHandle {
        let request = UpdateAppRequest {
            app,
            update_mask: Vec::new(),
        };
        self.unary(callback, move |transport, metadata, done| {
            transport.update_app(request, metadata, done)
        })
    }

    pub fn create_scale(
        &self,
        request: CreateScaleRequest,
        callback: impl FnOnce(Result<ScaleRequest>) + Send + 'static,
    ) -> CancelHandle {
        self.unary(callback, move |transport, metadata, done| {
            transport.create_scale(request, metadata, done)
        })
    }

    pub fn create_release(
        &self,
        parent: &str,
        release: Release,
        callback: impl FnOnce(Result<Release>) + Send + 'static,
    ) -> CancelHandle {
        let request = CreateReleaseRequest {
            parent: parent.to_string(),
            release,
        };
        self.unary(callback, move |transport, metadata, done| {
            transport.create_release(request, metadata, done)
        })
    }

    /// Start a deployment of `parent`. The callback sees the deployment's
    /// final status.
    pub fn create_deployment(
        &self,
        parent: &str,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> CancelHandle {
        let request = CreateDeploymentRequest {
            parent: parent.to_string(),
        };
        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();

        with_auth(&self.ctx.auth, move || {
            let stream =
                transport.create_deployment(request, CallMetadata::from_auth(ctx.auth.as_ref()));

            let callback = Mutex::new(Some(callback));
            stream.on_end(Arc::new(move |status: Option<&Status>| {
                let Some(callback) = callback.lock().take() else {
                    return;
                };
                callback(match status {
                    Some(status) if status.is_ok() => Ok(()),
                    Some(status) => Err(ClientError::from_status(status)),
                    None => Err(ClientError::unknown()),
                });
            }));

            CancelHandle::for_stream(stream, &ctx, &[CancelOption::ConfirmCancel])
        })
    }

    fn unary<R, C>(
        &self,
        callback: C,
        call: impl FnOnce(&dyn ControllerTransport, CallMetadata, UnaryCallback<R>) -> Arc<dyn UnaryCall>
            + Send
            + 'static,
    ) -> CancelHandle
    where
        R: Send + 'static,
        C: FnOnce(Result<R>) + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();

        with_auth(&self.ctx.auth, move || {
            let ended = Arc::new(EndSignal::default());
            let signal = Arc::clone(&ended);
            let done: UnaryCallback<R> = Box::new(move |result| {
                signal.fire();
                callback(result.map_err(ClientError::from));
            });

            let call = call(
                transport.as_ref(),
                CallMetadata::from_auth(ctx.auth.as_ref()),
                done,
            );
            let resource = Arc::new(UnaryResource { call, ended });
            CancelHandle::for_resource(resource, &ctx, &[CancelOption::ConfirmCancel])
        })
    }
}

/// Completion flag plus listeners, for calls that may finish before anyone
/// listens.
#[derive(Default)]
struct EndSignal {
    fired: AtomicBool,
    listeners: Emitter<()>,
}

impl EndSignal {
    fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.listeners.dispatch(&());
        }
    }
}

struct UnaryResource {
    call: Arc<dyn UnaryCall>,
    ended: Arc<EndSignal>,
}

impl Cancellable for UnaryResource {
    fn cancel(&self) {
        self.call.cancel();
    }

    fn on_end(&self, handler: Arc<dyn Fn() + Send + Sync>) {
        if self.ended.fired.load(Ordering::SeqCst) {
            handler();
            return;
        }
        // Lives as long as the signal; the call ends at most once.
        let _listener = self.ended.listeners.add_listener(move |_| handler());
    }
}
