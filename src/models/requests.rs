//! Request types, request modifiers and subscription fingerprints.

use super::entities::{
    App, DeploymentStatus, EventType, Release, ReleaseType, ScaleRequestState,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOp {
    #[default]
    In,
    NotIn,
    Exists,
    NotExists,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelExpression {
    pub key: String,
    pub op: LabelOp,
    pub values: Vec<String>,
}

/// Expressions ANDed together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFilter {
    pub expressions: Vec<LabelExpression>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAppsRequest {
    pub page_size: i32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub label_filters: Vec<LabelFilter>,
    pub stream_creates: bool,
    pub stream_updates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReleasesRequest {
    pub page_size: i32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub label_filters: Vec<LabelFilter>,
    pub stream_creates: bool,
    pub stream_updates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamScalesRequest {
    pub page_size: i32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub state_filters: Vec<ScaleRequestState>,
    pub stream_creates: bool,
    pub stream_updates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDeploymentsRequest {
    pub page_size: i32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub type_filters: Vec<ReleaseType>,
    pub status_filters: Vec<DeploymentStatus>,
    pub stream_creates: bool,
    pub stream_updates: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDeploymentEventsRequest {
    pub page_size: i32,
    pub page_token: String,
    pub name_filters: Vec<String>,
    pub type_filters: Vec<EventType>,
    pub stream_creates: bool,
    pub stream_updates: bool,
}

// --- Write requests ---

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAppRequest {
    pub app: App,
    /// Fields to update. Empty means all fields.
    pub update_mask: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateScaleRequest {
    /// Release the scale applies to.
    pub parent: String,
    pub processes: BTreeMap<String, i32>,
    pub tags: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReleaseRequest {
    pub parent: String,
    pub release: Release,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub parent: String,
}

// --- Request capabilities ---

pub trait Paginated {
    fn set_page_size(&mut self, page_size: i32);
    fn set_page_token(&mut self, page_token: String);
}

pub trait NameFilterable {
    fn set_name_filters(&mut self, names: Vec<String>);
}

pub trait StreamToggles {
    fn set_stream_creates(&mut self, value: bool);
    fn set_stream_updates(&mut self, value: bool);
}

macro_rules! impl_stream_request {
    ($($ty:ty),*) => {
        $(
            impl Paginated for $ty {
                fn set_page_size(&mut self, page_size: i32) {
                    self.page_size = page_size;
                }

                fn set_page_token(&mut self, page_token: String) {
                    self.page_token = page_token;
                }
            }

            impl NameFilterable for $ty {
                fn set_name_filters(&mut self, names: Vec<String>) {
                    self.name_filters = names;
                }
            }

            impl StreamToggles for $ty {
                fn set_stream_creates(&mut self, value: bool) {
                    self.stream_creates = value;
                }

                fn set_stream_updates(&mut self, value: bool) {
                    self.stream_updates = value;
                }
            }
        )*
    };
}

impl_stream_request!(
    StreamAppsRequest,
    StreamReleasesRequest,
    StreamScalesRequest,
    StreamDeploymentsRequest,
    StreamDeploymentEventsRequest
);

/// A named mutation applied to a request before it is sent.
///
/// The key identifies the mutation; equal keys must mean equal effects, since
/// keys are what subscriptions are deduplicated on.
pub struct RequestModifier<R> {
    key: String,
    apply: Arc<dyn Fn(&mut R) + Send + Sync>,
}

impl<R> Clone for RequestModifier<R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<R> fmt::Debug for RequestModifier<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestModifier({})", self.key)
    }
}

impl<R> RequestModifier<R> {
    pub fn new(key: impl Into<String>, apply: impl Fn(&mut R) + Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn apply(&self, request: &mut R) {
        (self.apply)(request)
    }
}

/// Build a request by applying modifiers, in order, to its default.
pub fn build_request<R: Default>(modifiers: &[RequestModifier<R>]) -> R {
    let mut request = R::default();
    for modifier in modifiers {
        modifier.apply(&mut request);
    }
    request
}

pub fn set_page_size<R: Paginated + 'static>(page_size: i32) -> RequestModifier<R> {
    RequestModifier::new(format!("pageSize--{page_size}"), move |req: &mut R| {
        req.set_page_size(page_size)
    })
}

pub fn set_page_token<R: Paginated + 'static>(page_token: &str) -> RequestModifier<R> {
    let token = page_token.to_string();
    RequestModifier::new(format!("pageToken--{token}"), move |req: &mut R| {
        req.set_page_token(token.clone())
    })
}

pub fn set_name_filters<R: NameFilterable + 'static>(names: &[&str]) -> RequestModifier<R> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    RequestModifier::new(format!("nameFilters--{}", names.join("|")), move |req: &mut R| {
        req.set_name_filters(names.clone())
    })
}

pub fn set_stream_creates<R: StreamToggles + 'static>() -> RequestModifier<R> {
    RequestModifier::new("streamCreates", |req: &mut R| req.set_stream_creates(true))
}

pub fn set_stream_updates<R: StreamToggles + 'static>() -> RequestModifier<R> {
    RequestModifier::new("streamUpdates", |req: &mut R| req.set_stream_updates(true))
}

pub fn deployment_type_filters(
    types: &[ReleaseType],
) -> RequestModifier<StreamDeploymentsRequest> {
    let types = types.to_vec();
    let key = types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join("|");
    RequestModifier::new(
        format!("filterTypes--{key}"),
        move |req: &mut StreamDeploymentsRequest| req.type_filters = types.clone(),
    )
}

pub fn deployment_status_filters(
    statuses: &[DeploymentStatus],
) -> RequestModifier<StreamDeploymentsRequest> {
    let statuses = statuses.to_vec();
    let key = statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("|");
    RequestModifier::new(
        format!("filterStatus--{key}"),
        move |req: &mut StreamDeploymentsRequest| req.status_filters = statuses.clone(),
    )
}

pub fn deployment_event_type_filters(
    types: &[EventType],
) -> RequestModifier<StreamDeploymentEventsRequest> {
    let types = types.to_vec();
    let key = types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join("|");
    RequestModifier::new(
        format!("filterTypes--{key}"),
        move |req: &mut StreamDeploymentEventsRequest| req.type_filters = types.clone(),
    )
}

/// Exclude apps carrying any of the given `(key, value)` labels.
pub fn exclude_apps_with_labels(labels: &[(&str, &str)]) -> RequestModifier<StreamAppsRequest> {
    let labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let key = serde_json::to_string(&labels).unwrap_or_default();
    RequestModifier::new(
        format!("excludeAppsWithLabels--{key}"),
        move |req: &mut StreamAppsRequest| {
            for (key, value) in &labels {
                req.label_filters.push(LabelFilter {
                    expressions: vec![LabelExpression {
                        key: key.clone(),
                        op: LabelOp::NotIn,
                        values: vec![value.clone()],
                    }],
                });
            }
        },
    )
}

pub fn filter_scales_by_state(
    states: &[ScaleRequestState],
) -> RequestModifier<StreamScalesRequest> {
    let states = states.to_vec();
    let key = serde_json::to_string(&states).unwrap_or_default();
    RequestModifier::new(
        format!("stateFilters--{key}"),
        move |req: &mut StreamScalesRequest| req.state_filters = states.clone(),
    )
}

/// Identity of a logical subscription: the modifier keys joined in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(key: impl Into<String>) -> Self {
        Fingerprint(key.into())
    }

    pub fn from_modifiers<R>(modifiers: &[RequestModifier<R>]) -> Self {
        let keys: Vec<&str> = modifiers.iter().map(|m| m.key()).collect();
        Fingerprint(keys.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short digest for log fields; fingerprints can be long.
    pub fn short_id(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
