//! Unit tests for per-parent route acceptance

use crds::{Condition, ConditionStatus, FromNamespaces, ListenerProtocol, RouteParentStatus};

use super::http_route::{
    ParentDecision, evaluate_parent, hostnames_overlap, is_gateway_parent, merge_parent_statuses,
};
use crate::conditions::ACCEPTED;
use crate::test_utils::*;

const CONTROLLER: &str = "gateways.microscaler.io/gateway-controller";

fn accepted(decision: &ParentDecision) -> bool {
    matches!(decision, ParentDecision::Accepted)
}

fn rejection_reason(decision: &ParentDecision) -> &'static str {
    match decision {
        ParentDecision::Accepted => "Accepted",
        ParentDecision::Rejected { reason, .. } => reason,
    }
}

#[test]
fn test_same_namespace_route_is_accepted() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_namespace_policy(
            make_listener("http", ListenerProtocol::Http, 80),
            FromNamespaces::Same,
        )],
    );

    let decision = evaluate_parent("apps", &[], None, &gateway, None);
    assert!(accepted(&decision));
}

#[test]
fn test_cross_namespace_route_is_rejected_by_same_policy() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_namespace_policy(
            make_listener("http", ListenerProtocol::Http, 80),
            FromNamespaces::Same,
        )],
    );

    let decision = evaluate_parent("other", &[], None, &gateway, None);
    assert_eq!(rejection_reason(&decision), "NotAllowedByListeners");
}

#[test]
fn test_all_policy_admits_cross_namespace_route() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_namespace_policy(
            make_listener("http", ListenerProtocol::Http, 80),
            FromNamespaces::All,
        )],
    );

    let decision = evaluate_parent("other", &[], None, &gateway, None);
    assert!(accepted(&decision));
}

#[test]
fn test_selector_policy_matches_namespace_labels() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_namespace_selector(
            make_listener("http", ListenerProtocol::Http, 80),
            &[("team", "platform")],
        )],
    );

    let matching = [("team".to_string(), "platform".to_string())].into();
    let decision = evaluate_parent("other", &[], Some(&matching), &gateway, None);
    assert!(accepted(&decision));

    let mismatched = [("team".to_string(), "payments".to_string())].into();
    let decision = evaluate_parent("other", &[], Some(&mismatched), &gateway, None);
    assert_eq!(rejection_reason(&decision), "NotAllowedByListeners");

    // Unknown namespace labels never satisfy a selector.
    let decision = evaluate_parent("other", &[], None, &gateway, None);
    assert_eq!(rejection_reason(&decision), "NotAllowedByListeners");
}

#[test]
fn test_missing_section_name_is_rejected() {
    let gateway = make_gateway("http", "apps", "edge", vec![make_listener("http", ListenerProtocol::Http, 80)]);

    let decision = evaluate_parent("apps", &[], None, &gateway, Some("https"));
    assert_eq!(rejection_reason(&decision), "NoMatchingListener");
}

#[test]
fn test_section_name_targets_one_listener() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![
            make_listener("http", ListenerProtocol::Http, 80),
            with_namespace_policy(
                make_listener("internal", ListenerProtocol::Http, 8080),
                FromNamespaces::Same,
            ),
        ],
    );

    // The named listener rejects the cross-namespace route even though the
    // other listener (default Same policy, same namespace rule) would too;
    // the decision is computed against the targeted listener only.
    let decision = evaluate_parent("other", &[], None, &gateway, Some("internal"));
    assert_eq!(rejection_reason(&decision), "NotAllowedByListeners");

    let decision = evaluate_parent("apps", &[], None, &gateway, Some("internal"));
    assert!(accepted(&decision));
}

#[test]
fn test_tcp_listener_does_not_admit_http_routes() {
    let gateway = make_gateway("tcp", "apps", "edge", vec![make_listener("tcp", ListenerProtocol::Tcp, 9000)]);

    let decision = evaluate_parent("apps", &[], None, &gateway, None);
    assert_eq!(rejection_reason(&decision), "NoMatchingListener");
}

#[test]
fn test_hostname_intersection_gates_acceptance() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_hostname(
            make_listener("http", ListenerProtocol::Http, 80),
            "*.example.org",
        )],
    );

    let matching = vec!["provisioner.example.org".to_string()];
    assert!(accepted(&evaluate_parent("apps", &matching, None, &gateway, None)));

    let mismatched = vec!["provisioner.example.net".to_string()];
    let decision = evaluate_parent("apps", &mismatched, None, &gateway, None);
    assert_eq!(rejection_reason(&decision), "NoIntersectingHostnames");
}

#[test]
fn test_route_without_hostnames_matches_any_listener_hostname() {
    let gateway = make_gateway(
        "http",
        "apps",
        "edge",
        vec![with_hostname(
            make_listener("http", ListenerProtocol::Http, 80),
            "app.example.org",
        )],
    );

    assert!(accepted(&evaluate_parent("apps", &[], None, &gateway, None)));
}

#[test]
fn test_hostname_overlap_rules() {
    assert!(hostnames_overlap("app.example.org", "app.example.org"));
    assert!(!hostnames_overlap("app.example.org", "other.example.org"));

    assert!(hostnames_overlap("*.example.org", "app.example.org"));
    assert!(hostnames_overlap("app.example.org", "*.example.org"));
    assert!(!hostnames_overlap("*.example.org", "example.org"));
    assert!(!hostnames_overlap("*.example.org", "app.example.net"));

    assert!(hostnames_overlap("*.example.org", "*.example.org"));
    assert!(hostnames_overlap("*.sub.example.org", "*.example.org"));
}

#[test]
fn test_parent_kind_filter() {
    assert!(is_gateway_parent(&make_parent_ref("http", None)));

    let mut service_parent = make_parent_ref("some-svc", None);
    service_parent.kind = Some("Service".to_string());
    service_parent.group = Some(String::new());
    assert!(!is_gateway_parent(&service_parent));
}

#[test]
fn test_merge_parent_statuses_is_idempotent() {
    let desired = vec![RouteParentStatus {
        parent_ref: make_parent_ref("http", None),
        controller_name: CONTROLLER.to_string(),
        conditions: vec![Condition::new(ACCEPTED, ConditionStatus::True, "Accepted", "ok", Some(1))],
    }];

    let mut parents = Vec::new();
    assert!(merge_parent_statuses(&mut parents, &desired, CONTROLLER));
    assert_eq!(parents.len(), 1);

    // Re-merging the identical desired state produces no change.
    assert!(!merge_parent_statuses(&mut parents, &desired, CONTROLLER));
}

#[test]
fn test_merge_preserves_foreign_controller_entries() {
    let mut parents = vec![RouteParentStatus {
        parent_ref: make_parent_ref("legacy", None),
        controller_name: "example.com/other-controller".to_string(),
        conditions: vec![Condition::new(ACCEPTED, ConditionStatus::True, "Accepted", "ok", Some(1))],
    }];

    let desired = vec![RouteParentStatus {
        parent_ref: make_parent_ref("http", None),
        controller_name: CONTROLLER.to_string(),
        conditions: vec![Condition::new(ACCEPTED, ConditionStatus::True, "Accepted", "ok", Some(1))],
    }];

    assert!(merge_parent_statuses(&mut parents, &desired, CONTROLLER));
    assert_eq!(parents.len(), 2);
    assert!(parents.iter().any(|p| p.controller_name == "example.com/other-controller"));
}

#[test]
fn test_merge_prunes_stale_own_entries() {
    let mut parents = vec![RouteParentStatus {
        parent_ref: make_parent_ref("removed", None),
        controller_name: CONTROLLER.to_string(),
        conditions: vec![Condition::new(ACCEPTED, ConditionStatus::True, "Accepted", "ok", Some(1))],
    }];

    // The route's spec no longer references that parent.
    assert!(merge_parent_statuses(&mut parents, &[], CONTROLLER));
    assert!(parents.is_empty());
}

#[test]
fn test_per_parent_independence() {
    // One accepting parent and one rejecting parent coexist in status.
    let desired = vec![
        RouteParentStatus {
            parent_ref: make_parent_ref("http-0", None),
            controller_name: CONTROLLER.to_string(),
            conditions: vec![Condition::new(ACCEPTED, ConditionStatus::True, "Accepted", "ok", Some(1))],
        },
        RouteParentStatus {
            parent_ref: make_parent_ref("http-1", None),
            controller_name: CONTROLLER.to_string(),
            conditions: vec![Condition::new(
                ACCEPTED,
                ConditionStatus::False,
                "NoMatchingListener",
                "no listener",
                Some(1),
            )],
        },
    ];

    let mut parents = Vec::new();
    merge_parent_statuses(&mut parents, &desired, CONTROLLER);

    assert_eq!(parents.len(), 2);
    assert_eq!(parents[0].conditions[0].status, ConditionStatus::True);
    assert_eq!(parents[1].conditions[0].status, ConditionStatus::False);
}
