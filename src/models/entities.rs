//! Controller entities and streamed responses.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entities identified by a resource name.
pub trait Named {
    fn name(&self) -> &str;
}

/// Entities carrying a creation time.
pub trait Created {
    fn create_time(&self) -> Option<Timestamp>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub display_name: String,
    pub labels: BTreeMap<String, String>,
    /// Name of the current release.
    pub release: String,
    pub create_time: Option<Timestamp>,
    /// Set once the app has been deleted.
    pub delete_time: Option<Timestamp>,
}

impl App {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    #[default]
    Any,
    Code,
    Config,
}

impl ReleaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseType::Any => "any",
            ReleaseType::Code => "code",
            ReleaseType::Config => "config",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub artifacts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub processes: BTreeMap<String, String>,
    pub create_time: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleRequestState {
    #[default]
    Pending,
    Cancelled,
    Complete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub name: String,
    pub parent: String,
    pub state: ScaleRequestState,
    pub old_processes: BTreeMap<String, i32>,
    pub new_processes: BTreeMap<String, i32>,
    pub create_time: Option<Timestamp>,
    pub update_time: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Failed,
    Running,
    Complete,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Complete => "complete",
        }
    }
}

/// A deployment with its old and new releases resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedDeployment {
    pub name: String,
    pub old_release: Option<Release>,
    pub new_release: Option<Release>,
    pub release_type: ReleaseType,
    pub status: DeploymentStatus,
    pub processes: BTreeMap<String, i32>,
    pub create_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub state: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Deployment,
    Job,
    ScaleRequest,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Deployment => "deployment",
            EventType::Job => "job",
            EventType::ScaleRequest => "scale_request",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Deployment { deployment: ExpandedDeployment },
    Job { job: Job },
    ScaleRequest { scale_request: ScaleRequest },
}

/// Something that happened to a deployment, job or scale request.
///
/// Events are reconciled by `parent`: only the newest event per parent is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Name of the object the event is about.
    pub parent: String,
    pub create_time: Option<Timestamp>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::Deployment { .. } => EventType::Deployment,
            EventPayload::Job { .. } => EventType::Job,
            EventPayload::ScaleRequest { .. } => EventType::ScaleRequest,
        }
    }

    /// Ordering time: the nested object's creation time for deployments and
    /// scale requests, the event's own otherwise.
    pub fn data_time(&self) -> Timestamp {
        let time = match &self.payload {
            EventPayload::Deployment { deployment } => deployment.create_time,
            EventPayload::ScaleRequest { scale_request } => scale_request.create_time,
            EventPayload::Job { .. } => self.create_time,
        };
        time.unwrap_or_default()
    }
}

macro_rules! impl_entity {
    ($($ty:ty),*) => {
        $(
            impl Named for $ty {
                fn name(&self) -> &str {
                    &self.name
                }
            }

            impl Created for $ty {
                fn create_time(&self) -> Option<Timestamp> {
                    self.create_time
                }
            }
        )*
    };
}

impl_entity!(App, Release, ScaleRequest, ExpandedDeployment, Event);

// --- Responses ---

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAppsResponse {
    pub apps: Vec<App>,
    pub page_complete: bool,
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReleasesResponse {
    pub releases: Vec<Release>,
    pub page_complete: bool,
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamScalesResponse {
    pub scale_requests: Vec<ScaleRequest>,
    pub page_complete: bool,
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDeploymentsResponse {
    pub deployments: Vec<ExpandedDeployment>,
    pub page_complete: bool,
    pub next_page_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDeploymentEventsResponse {
    pub events: Vec<Event>,
    pub page_complete: bool,
    pub next_page_token: String,
}
