//! Snapshot merge functions.
//!
//! Every streamed kind folds deltas into a snapshot with a pure function of
//! the shape `merge(previous, delta) -> snapshot`:
//! - Entity lists are upserted by name and then stably sorted per kind.
//! - Apps sort by display name; deleted apps stay listed as tombstones.
//! - Releases, scale requests and deployments sort newest first.
//! - Events are reconciled by parent (see [`merge_deployment_events`]).
//!
//! Page metadata is taken from the delta. A delta that carries none (empty
//! token, page not complete) keeps the previous snapshot's.

mod events;
mod upsert;

pub use events::merge_deployment_events;
pub use upsert::TOMBSTONE_SUFFIX;

use crate::models::{
    App, StreamAppsResponse, StreamDeploymentsResponse, StreamReleasesResponse,
    StreamScalesResponse,
};
use upsert::{newest_first, tombstone_name, upsert_by_name};

fn inherit_page_meta(
    previous: Option<(&str, bool)>,
    next_page_token: &mut String,
    page_complete: &mut bool,
) {
    if let Some((token, complete)) = previous {
        if next_page_token.is_empty() && !*page_complete {
            *next_page_token = token.to_string();
            *page_complete = complete;
        }
    }
}

pub fn merge_apps(
    previous: Option<&StreamAppsResponse>,
    mut delta: StreamAppsResponse,
) -> StreamAppsResponse {
    let kept = previous.map(|p| p.apps.as_slice()).unwrap_or(&[]);
    let incoming = std::mem::take(&mut delta.apps);

    let mut apps = upsert_by_name(kept, incoming, |replaced: Option<&App>, app: &mut App| {
        if app.is_deleted() {
            let base = replaced.map(|old| old.display_name.as_str()).unwrap_or(&app.display_name);
            app.display_name = tombstone_name(base);
        }
    });
    apps.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    delta.apps = apps;
    inherit_page_meta(
        previous.map(|p| (p.next_page_token.as_str(), p.page_complete)),
        &mut delta.next_page_token,
        &mut delta.page_complete,
    );
    delta
}

pub fn merge_releases(
    previous: Option<&StreamReleasesResponse>,
    mut delta: StreamReleasesResponse,
) -> StreamReleasesResponse {
    let kept = previous.map(|p| p.releases.as_slice()).unwrap_or(&[]);
    let incoming = std::mem::take(&mut delta.releases);

    let mut releases = upsert_by_name(kept, incoming, |_, _| {});
    releases.sort_by(newest_first);

    delta.releases = releases;
    inherit_page_meta(
        previous.map(|p| (p.next_page_token.as_str(), p.page_complete)),
        &mut delta.next_page_token,
        &mut delta.page_complete,
    );
    delta
}

pub fn merge_scales(
    previous: Option<&StreamScalesResponse>,
    mut delta: StreamScalesResponse,
) -> StreamScalesResponse {
    let kept = previous.map(|p| p.scale_requests.as_slice()).unwrap_or(&[]);
    let incoming = std::mem::take(&mut delta.scale_requests);

    let mut scales = upsert_by_name(kept, incoming, |_, _| {});
    scales.sort_by(newest_first);

    delta.scale_requests = scales;
    inherit_page_meta(
        previous.map(|p| (p.next_page_token.as_str(), p.page_complete)),
        &mut delta.next_page_token,
        &mut delta.page_complete,
    );
    delta
}

pub fn merge_deployments(
    previous: Option<&StreamDeploymentsResponse>,
    mut delta: StreamDeploymentsResponse,
) -> StreamDeploymentsResponse {
    let kept = previous.map(|p| p.deployments.as_slice()).unwrap_or(&[]);
    let incoming = std::mem::take(&mut delta.deployments);

    let mut deployments = upsert_by_name(kept, incoming, |_, _| {});
    deployments.sort_by(newest_first);

    delta.deployments = deployments;
    inherit_page_meta(
        previous.map(|p| (p.next_page_token.as_str(), p.page_complete)),
        &mut delta.next_page_token,
        &mut delta.page_complete,
    );
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{App, ExpandedDeployment, Release, ScaleRequest};
    use crate::types::Timestamp;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn apps(list: Vec<App>) -> StreamAppsResponse {
        StreamAppsResponse {
            apps: list,
            ..Default::default()
        }
    }

    #[test]
    fn test_app_upsert_orders_by_display_name() {
        let first = merge_apps(None, apps(vec![App::new("b", "b"), App::new("a", "a")]));
        let merged = merge_apps(Some(&first), apps(vec![App::new("a", "A2")]));

        let shown: Vec<(&str, &str)> = merged
            .apps
            .iter()
            .map(|a| (a.name.as_str(), a.display_name.as_str()))
            .collect();
        assert_eq!(shown, vec![("a", "A2"), ("b", "b")]);
    }

    #[test]
    fn test_deleted_app_becomes_tombstone() {
        let first = merge_apps(None, apps(vec![App::new("apps/1", "web")]));
        let mut deleted = App::new("apps/1", "");
        deleted.delete_time = Some(Timestamp::from_secs(5));

        let merged = merge_apps(Some(&first), apps(vec![deleted]));
        assert_eq!(merged.apps.len(), 1);
        assert_eq!(merged.apps[0].display_name, "web [DELETED]");
        assert!(merged.apps[0].is_deleted());
    }

    #[test]
    fn test_unseen_deleted_app_uses_own_name() {
        let mut deleted = App::new("apps/2", "api");
        deleted.delete_time = Some(Timestamp::from_secs(5));

        let merged = merge_apps(None, apps(vec![deleted]));
        assert_eq!(merged.apps[0].display_name, "api [DELETED]");
    }

    #[test]
    fn test_releases_newest_first_with_stable_ties() {
        let release = |name: &str, secs: Option<i64>| Release {
            name: name.into(),
            create_time: secs.map(Timestamp::from_secs),
            ..Default::default()
        };
        let merged = merge_releases(
            None,
            StreamReleasesResponse {
                releases: vec![
                    release("old", Some(1)),
                    release("tie-a", Some(5)),
                    release("undated", None),
                    release("tie-b", Some(5)),
                ],
                ..Default::default()
            },
        );
        let names: Vec<&str> = merged.releases.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["tie-a", "tie-b", "old", "undated"]);
    }

    #[test]
    fn test_scales_replace_updated_request() {
        let scale = |name: &str, secs: i64, state| ScaleRequest {
            name: name.into(),
            state,
            create_time: Some(Timestamp::from_secs(secs)),
            ..Default::default()
        };
        use crate::models::ScaleRequestState::{Complete, Pending};

        let first = merge_scales(
            None,
            StreamScalesResponse {
                scale_requests: vec![scale("s1", 1, Pending), scale("s2", 2, Pending)],
                ..Default::default()
            },
        );
        let merged = merge_scales(
            Some(&first),
            StreamScalesResponse {
                scale_requests: vec![scale("s1", 1, Complete)],
                ..Default::default()
            },
        );
        assert_eq!(merged.scale_requests[0].name, "s2");
        assert_eq!(merged.scale_requests[1].state, Complete);
    }

    #[test]
    fn test_delta_metadata_wins() {
        let first = merge_deployments(
            None,
            StreamDeploymentsResponse {
                deployments: vec![ExpandedDeployment {
                    name: "d1".into(),
                    ..Default::default()
                }],
                next_page_token: "p2".into(),
                page_complete: false,
            },
        );
        let merged = merge_deployments(
            Some(&first),
            StreamDeploymentsResponse {
                page_complete: true,
                ..Default::default()
            },
        );
        assert_eq!(merged.deployments.len(), 1);
        assert!(merged.page_complete);
        assert_eq!(merged.next_page_token, "");
    }

    #[test]
    fn test_empty_delta_keeps_page_metadata() {
        let first = merge_scales(
            None,
            StreamScalesResponse {
                scale_requests: vec![ScaleRequest {
                    name: "s1".into(),
                    ..Default::default()
                }],
                next_page_token: "p2".into(),
                page_complete: false,
            },
        );
        let merged = merge_scales(Some(&first), StreamScalesResponse::default());
        assert_eq!(merged, first);
        assert_eq!(merged.next_page_token, "p2");
    }

    fn arb_page() -> impl Strategy<Value = (String, bool)> {
        ("[a-z0-9]{0,4}", any::<bool>())
    }

    fn arb_scale() -> impl Strategy<Value = ScaleRequest> {
        ("[a-e]", proptest::option::of(0i64..4)).prop_map(|(name, secs)| ScaleRequest {
            name: format!("scales/{name}"),
            create_time: secs.map(Timestamp::from_secs),
            ..Default::default()
        })
    }

    fn arb_deployment() -> impl Strategy<Value = ExpandedDeployment> {
        ("[a-e]", proptest::option::of(0i64..4)).prop_map(|(name, secs)| ExpandedDeployment {
            name: format!("deployments/{name}"),
            create_time: secs.map(Timestamp::from_secs),
            ..Default::default()
        })
    }

    fn arb_app() -> impl Strategy<Value = App> {
        ("[a-e]", "[A-Za-z]{0,3}", proptest::option::of(0i64..5)).prop_map(
            |(name, display, deleted)| App {
                name: format!("apps/{name}"),
                display_name: display,
                delete_time: deleted.map(Timestamp::from_secs),
                ..Default::default()
            },
        )
    }

    fn arb_release() -> impl Strategy<Value = Release> {
        ("[a-e]", proptest::option::of(0i64..4)).prop_map(|(name, secs)| Release {
            name: format!("releases/{name}"),
            create_time: secs.map(Timestamp::from_secs),
            ..Default::default()
        })
    }

    proptest! {
        #[test]
        fn prop_app_merge_with_empty_delta_is_identity(
            list in proptest::collection::vec(arb_app(), 0..12),
            (next_page_token, page_complete) in arb_page(),
        ) {
            let snapshot = merge_apps(None, StreamAppsResponse { apps: list, page_complete, next_page_token });
            let again = merge_apps(Some(&snapshot), StreamAppsResponse::default());
            prop_assert_eq!(again, snapshot);
        }

        #[test]
        fn prop_app_names_stay_unique(
            first in proptest::collection::vec(arb_app(), 0..8),
            second in proptest::collection::vec(arb_app(), 0..8),
        ) {
            let snapshot = merge_apps(None, apps(first));
            let merged = merge_apps(Some(&snapshot), apps(second));
            let names: HashSet<&str> = merged.apps.iter().map(|a| a.name.as_str()).collect();
            prop_assert_eq!(names.len(), merged.apps.len());
            prop_assert!(merged.apps.windows(2).all(|w| w[0].display_name <= w[1].display_name));
        }

        #[test]
        fn prop_release_merge_with_empty_delta_is_identity(
            list in proptest::collection::vec(arb_release(), 0..12),
            (next_page_token, page_complete) in arb_page(),
        ) {
            let snapshot = merge_releases(None, StreamReleasesResponse { releases: list, page_complete, next_page_token });
            let again = merge_releases(Some(&snapshot), StreamReleasesResponse::default());
            prop_assert_eq!(&again, &snapshot);
            prop_assert!(snapshot.releases.windows(2).all(|w| w[0].create_time.unwrap_or_default() >= w[1].create_time.unwrap_or_default()));
        }

        #[test]
        fn prop_scale_merge_with_empty_delta_is_identity(
            list in proptest::collection::vec(arb_scale(), 0..12),
            (next_page_token, page_complete) in arb_page(),
        ) {
            let snapshot = merge_scales(None, StreamScalesResponse { scale_requests: list, page_complete, next_page_token });
            let again = merge_scales(Some(&snapshot), StreamScalesResponse::default());
            prop_assert_eq!(again, snapshot);
        }

        #[test]
        fn prop_deployment_merge_with_empty_delta_is_identity(
            list in proptest::collection::vec(arb_deployment(), 0..12),
            (next_page_token, page_complete) in arb_page(),
        ) {
            let snapshot = merge_deployments(None, StreamDeploymentsResponse { deployments: list, page_complete, next_page_token });
            let again = merge_deployments(Some(&snapshot), StreamDeploymentsResponse::default());
            prop_assert_eq!(again, snapshot);
        }
    }
}
