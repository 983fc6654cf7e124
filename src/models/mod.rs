//! Controller API models.
//!
//! Entities and responses are plain data; the transport that encodes them is
//! outside this crate. Requests are shaped by [`RequestModifier`]s, whose keys
//! form the [`Fingerprint`] that subscriptions are shared on.

mod entities;
mod requests;

pub use entities::{
    App, Created, DeploymentStatus, Event, EventPayload, EventType, ExpandedDeployment, Job, Named,
    Release, ReleaseType, ScaleRequest, ScaleRequestState, StreamAppsResponse,
    StreamDeploymentEventsResponse, StreamDeploymentsResponse, StreamReleasesResponse,
    StreamScalesResponse,
};
pub use requests::{
    build_request, deployment_event_type_filters, deployment_status_filters,
    deployment_type_filters, exclude_apps_with_labels, filter_scales_by_state, set_name_filters,
    set_page_size, set_page_token, set_stream_creates, set_stream_updates, CreateDeploymentRequest,
    CreateReleaseRequest, CreateScaleRequest, Fingerprint, LabelExpression, LabelFilter, LabelOp,
    NameFilterable, Paginated, RequestModifier, StreamAppsRequest, StreamDeploymentEventsRequest,
    StreamDeploymentsRequest, StreamReleasesRequest, StreamScalesRequest, StreamToggles,
    UpdateAppRequest,
};
