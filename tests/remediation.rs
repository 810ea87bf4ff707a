//! Remediation Integration Tests
//!
//! Tests for guard decisions, retries, timeouts, target locking, the
//! inventory lookups queued ahead of an operation, and the step limit.

mod common;

use std::sync::Arc;
use std::time::Duration;

use closed_loop::adapters::{ActorService, CollectingSink, OperatorOutput, SimulatedOperator};
use closed_loop::config::EngineSettings;
use closed_loop::domain::{
    ControlLoopEvent, NotificationType, OperationResult, OutboundMessage, TargetType,
};
use closed_loop::Dispatch;
use serde_json::{json, Value};
use uuid::Uuid;

use common::*;

const WAIT: Duration = Duration::from_secs(10);

fn appc_actors(guard: SimulatedOperator, appc: Arc<SimulatedOperator>) -> ActorService {
    let mut actors = ActorService::new().with_operator(guard);
    actors.register(appc);
    actors
}

fn for_request(
    notifications: &[closed_loop::Notification],
    request_id: Uuid,
) -> Vec<closed_loop::Notification> {
    notifications
        .iter()
        .filter(|n| n.request_id == Some(request_id))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_guard_deny_skips_operation() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart"));
    let guard = SimulatedOperator::new("GUARD", "Decision").with_result(OperationResult::Failure);
    let controller = controller(appc_actors(guard, appc.clone()), sink.clone());
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 0);

    let notifications = sink.notifications();
    assert_eq!(
        kinds(&notifications),
        vec![
            NotificationType::Active,
            NotificationType::Operation,
            NotificationType::Operation,
            NotificationType::FinalFailure,
        ]
    );
    assert_eq!(
        notifications[2].message.as_deref(),
        Some("Guard result for APPC Restart is Deny")
    );
}

#[tokio::test]
async fn test_guard_disabled_goes_straight_to_operation() {
    let sink = Arc::new(CollectingSink::new());
    let settings = EngineSettings {
        guard_disabled: true,
        ..EngineSettings::default()
    };

    // a denying guard must not be consulted
    let guard = SimulatedOperator::new("GUARD", "Decision").with_result(OperationResult::Failure);
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart"));
    let controller = controller_with(settings, appc_actors(guard, appc.clone()), sink.clone());
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 1);
    assert_eq!(
        kinds(&sink.notifications()),
        vec![
            NotificationType::Active,
            NotificationType::Operation,
            NotificationType::OperationSuccess,
            NotificationType::FinalSuccess,
        ]
    );
}

#[tokio::test]
async fn test_retries_then_failure_retries_edge() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_result(OperationResult::Failure));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc.clone()),
        sink.clone(),
    );
    controller
        .add_tosca_policy(restart_policy(json!({
            "retries": 2,
            "failure_retries": "final_openloop"
        })))
        .unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 3);

    let notifications = sink.notifications();
    let failures = notifications
        .iter()
        .filter(|n| n.notification == NotificationType::OperationFailure)
        .count();
    assert_eq!(failures, 3);
    assert_eq!(
        notifications.last().map(|n| n.notification),
        Some(NotificationType::FinalOpenloop)
    );
}

#[tokio::test]
async fn test_failure_without_retries_follows_failure_edge() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_result(OperationResult::Failure));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc.clone()),
        sink.clone(),
    );
    controller
        .add_tosca_policy(restart_policy(json!({"failure": "final_openloop"})))
        .unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 1);
    assert_eq!(
        sink.notifications().last().map(|n| n.notification),
        Some(NotificationType::FinalOpenloop)
    );
}

#[tokio::test]
async fn test_operator_error_is_an_exception() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_error("connection refused"));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc),
        sink.clone(),
    );
    controller
        .add_tosca_policy(restart_policy(json!({"retries": 3})))
        .unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    let notifications = sink.notifications();
    let failure = notifications
        .iter()
        .find(|n| n.notification == NotificationType::OperationFailure)
        .unwrap();
    assert!(failure.message.as_deref().unwrap().contains("connection refused"));

    // exceptions are not retried
    assert_eq!(
        notifications
            .iter()
            .filter(|n| n.notification == NotificationType::OperationFailure)
            .count(),
        1
    );
    assert_eq!(
        notifications.last().map(|n| n.notification),
        Some(NotificationType::FinalFailure)
    );
}

#[tokio::test]
async fn test_operation_timeout() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_delay(Duration::from_secs(3)));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc),
        sink.clone(),
    );
    controller
        .add_tosca_policy(restart_policy(json!({
            "timeout": 1,
            "failure_timeout": "final_openloop"
        })))
        .unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    let notifications = sink.notifications();
    assert!(notifications
        .iter()
        .any(|n| n.notification == NotificationType::OperationFailure));

    let last = notifications.last().unwrap();
    assert_eq!(last.notification, NotificationType::FinalOpenloop);
    let record = last.history.last().unwrap();
    assert_eq!(record.actor, "APPC");
    assert_eq!(record.outcome.as_deref(), Some("FAILURE_TIMEOUT"));
}

#[tokio::test]
async fn test_overall_timeout() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_delay(Duration::from_secs(5)));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc),
        sink.clone(),
    );
    controller
        .add_tosca_policy(restart_policy_with_timeout(json!({}), 1))
        .unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    let last = sink.notifications().last().cloned().unwrap();
    assert_eq!(last.notification, NotificationType::FinalFailure);
    assert_eq!(last.message.as_deref(), Some("Control Loop timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_contention_rejects_second_transaction() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart").with_delay(Duration::from_millis(500)));
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc.clone()),
        sink.clone(),
    );
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    assert_eq!(controller.process_event(vm_onset(first)), Dispatch::Created);

    // wait for the first transaction to hold the lock
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while controller.locks().owner("vm-1") != Some(first) {
        assert!(tokio::time::Instant::now() < deadline, "lock never taken");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(controller.process_event(vm_onset(second)), Dispatch::Created);
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 1);
    assert!(controller.locks().is_empty());

    let notifications = sink.notifications();
    assert_eq!(
        for_request(&notifications, first).last().map(|n| n.notification),
        Some(NotificationType::FinalSuccess)
    );

    let second_notes = for_request(&notifications, second);
    assert_eq!(
        kinds(&second_notes),
        vec![
            NotificationType::Active,
            NotificationType::Rejected,
            NotificationType::FinalFailure,
        ]
    );
    assert_eq!(
        second_notes[1].message.as_deref(),
        Some("The target vm-1 is already locked")
    );
}

#[tokio::test]
async fn test_control_loop_response_is_published() {
    let sink = Arc::new(CollectingSink::new());
    let appc = Arc::new(
        SimulatedOperator::new("APPC", "Restart").with_control_loop_payload(r#"{"status":"restarted"}"#),
    );
    let controller = controller(
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc),
        sink.clone(),
    );
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    let request_id = Uuid::new_v4();
    controller.process_event(vm_onset(request_id));
    assert!(controller.wait_idle(WAIT).await);

    let responses: Vec<_> = sink
        .messages()
        .into_iter()
        .filter_map(|(channel, message)| match message {
            OutboundMessage::Response(response) => Some((channel, response)),
            _ => None,
        })
        .collect();

    assert_eq!(responses.len(), 1);
    let (channel, response) = &responses[0];
    assert_eq!(channel, "DCAE_CL_RSP");
    assert_eq!(response.target, "DCAE");
    assert_eq!(response.from, "APPC");
    assert_eq!(response.request_id, Some(request_id));
    assert_eq!(response.payload.as_deref(), Some(r#"{"status":"restarted"}"#));
    assert_eq!(response.policy_name.as_deref(), Some(POLICY_NAME));
}

fn custom_query_with_modules(count: usize) -> Value {
    let modules: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "vf-module-id": format!("vfm-{}", i),
                "model-invariant-id": "inv-1",
                "model-version-id": "ver-1",
                "model-customization-id": "cust-1"
            })
        })
        .collect();

    json!({
        "results": [
            {"generic-vnf": {
                "vnf-id": "vnf-1",
                "vnf-name": "vnf-name-1",
                "model-invariant-id": "vnf-inv-1",
                "model-version-id": "vnf-ver-1",
                "vf-modules": {"vf-module": modules}
            }},
            {"cloud-region": {"cloud-owner": "CloudOwner", "cloud-region-id": "RegionOne"}},
            {"tenant": {"tenant-id": "tenant-1", "tenant-name": "demo"}}
        ]
    })
}

#[tokio::test]
async fn test_vf_module_create_uses_inventory_count() {
    let sink = Arc::new(CollectingSink::new());

    let guard = RecordingOperator::new("GUARD", "Decision", OperatorOutput::success(None));
    let custom_query = RecordingOperator::new(
        "AAI",
        "CustomQuery",
        OperatorOutput::success(Some(custom_query_with_modules(3))),
    );
    let so = RecordingOperator::with_properties(
        "SO",
        "VF Module Create",
        vec!["data/vfCount".to_string()],
        OperatorOutput::success(None),
    );

    let mut actors = ActorService::new();
    actors.register(guard.clone());
    actors.register(custom_query.clone());
    actors.register(so.clone());

    let controller = controller(actors, sink.clone());

    let mut policy = restart_policy(json!({
        "id": "scale-out",
        "operation": {
            "actor": "SO",
            "operation": "VF Module Create",
            "target": {
                "targetType": "VFMODULE",
                "entityIds": {
                    "modelInvariantId": "inv-1",
                    "modelVersionId": "ver-1",
                    "modelCustomizationId": "cust-1"
                }
            }
        }
    }));
    policy.properties["trigger"] = json!("scale-out");
    controller.add_tosca_policy(policy).unwrap();

    let event = ControlLoopEvent::onset(CL_NAME, Uuid::new_v4())
        .with_target(TargetType::Vnf, "generic-vnf.vnf-id")
        .with_aai("generic-vnf.vnf-id", "vnf-1");
    assert_eq!(controller.process_event(event), Dispatch::Created);
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(custom_query.requests().len(), 1);

    let guard_requests = guard.requests();
    assert_eq!(guard_requests.len(), 1);
    let payload = &guard_requests[0].payload;
    assert_eq!(payload.get("actor"), Some(&json!("SO")));
    assert_eq!(payload.get("operation"), Some(&json!("VF Module Create")));
    assert_eq!(payload.get("target"), Some(&json!("vnf-1")));
    assert_eq!(payload.get("vfCount"), Some(&json!(4)));
    assert_eq!(payload.get("vnfId"), Some(&json!("vnf-1")));

    let so_requests = so.requests();
    assert_eq!(so_requests.len(), 1);
    assert_eq!(so_requests[0].target_entity.as_deref(), Some("vnf-1"));
    assert_eq!(so_requests[0].properties.get("data/vfCount"), Some(&json!(3)));

    assert_eq!(
        sink.notifications().last().map(|n| n.notification),
        Some(NotificationType::FinalSuccess)
    );
}

#[tokio::test]
async fn test_missing_operator_is_an_exception() {
    let sink = Arc::new(CollectingSink::new());
    let actors = ActorService::new().with_operator(SimulatedOperator::new("GUARD", "Decision"));
    let controller = controller(actors, sink.clone());
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    let notifications = sink.notifications();
    let failure = messages_of(&notifications, NotificationType::OperationFailure);
    assert_eq!(failure.len(), 1);
    assert!(failure[0].contains("no operator registered for APPC.Restart"));

    let last = notifications.last().unwrap();
    assert_eq!(last.notification, NotificationType::FinalFailure);
    assert_eq!(last.message.as_deref(), Some("Exception in processing closed loop"));
}

/// Policy whose first operation succeeds into `second`
fn chained_policy(first: Value, second: Value) -> closed_loop::domain::ToscaPolicy {
    let mut policy = restart_policy(first);
    if let Some(ops) = policy.properties["operations"].as_array_mut() {
        ops.push(second);
    }
    policy
}

fn register_all(operators: &[&Arc<RecordingOperator>]) -> ActorService {
    let mut actors = ActorService::new();
    for op in operators {
        actors.register((*op).clone());
    }
    actors
}

const TENANT_LINK: &str =
    "/aai/v21/cloud-infrastructure/cloud-regions/cloud-region/CloudOwner/RegionOne/tenants/tenant/tenant-1/vservers/vserver/vs-1";

#[tokio::test]
async fn test_vserver_link_queries_tenant_once() {
    let sink = Arc::new(CollectingSink::new());
    let log = journal();
    let needs_link = vec!["AAI/vserverLink".to_string()];

    let guard = RecordingOperator::journaled("GUARD", "Decision", vec![], OperatorOutput::success(None), &log);
    let tenant = RecordingOperator::journaled(
        "AAI",
        "Tenant",
        vec![],
        OperatorOutput::success(Some(json!({
            "result-data": [{"resource-type": "tenant", "resource-link": TENANT_LINK}]
        }))),
        &log,
    );
    let restart = RecordingOperator::journaled(
        "APPC",
        "Restart",
        needs_link.clone(),
        OperatorOutput::success(None),
        &log,
    );
    let rebuild = RecordingOperator::journaled("APPC", "Rebuild", needs_link, OperatorOutput::success(None), &log);

    let controller = controller(register_all(&[&guard, &tenant, &restart, &rebuild]), sink.clone());
    let policy = chained_policy(
        json!({"success": "rebuild"}),
        json!({
            "id": "rebuild",
            "operation": {"actor": "APPC", "operation": "Rebuild", "target": {"targetType": "VM"}}
        }),
    );
    controller.add_tosca_policy(policy).unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    // second operation reads the cached tenant data
    assert_eq!(
        *log.lock(),
        vec!["AAI.Tenant", "GUARD.Decision", "APPC.Restart", "GUARD.Decision", "APPC.Rebuild"]
    );

    let tenant_requests = tenant.requests();
    assert_eq!(tenant_requests.len(), 1);
    assert_eq!(tenant_requests[0].target_entity.as_deref(), Some("vm-1"));

    let expected = json!("/cloud-infrastructure/cloud-regions/cloud-region/CloudOwner/RegionOne/tenants/tenant/tenant-1/vservers/vserver/vs-1");
    for op in [&restart, &rebuild] {
        let requests = op.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].properties.get("AAI/vserverLink"), Some(&expected));
    }

    assert_eq!(
        sink.notifications().last().map(|n| n.notification),
        Some(NotificationType::FinalSuccess)
    );
}

#[tokio::test]
async fn test_vserver_link_without_vserver_name_is_an_exception() {
    let sink = Arc::new(CollectingSink::new());
    let guard = RecordingOperator::new("GUARD", "Decision", OperatorOutput::success(None));
    let tenant = RecordingOperator::new("AAI", "Tenant", OperatorOutput::success(None));
    let restart = RecordingOperator::with_properties(
        "APPC",
        "Restart",
        vec!["AAI/vserverLink".to_string()],
        OperatorOutput::success(None),
    );

    let controller = controller(register_all(&[&guard, &tenant, &restart]), sink.clone());
    controller
        .add_tosca_policy(restart_policy(json!({
            "operation": {"actor": "APPC", "operation": "Restart", "target": {"targetType": "VNF"}}
        })))
        .unwrap();

    let event = ControlLoopEvent::onset(CL_NAME, Uuid::new_v4())
        .with_target(TargetType::Vnf, "generic-vnf.vnf-id")
        .with_aai("generic-vnf.vnf-id", "vnf-1");
    controller.process_event(event);
    assert!(controller.wait_idle(WAIT).await);

    assert!(tenant.requests().is_empty());
    assert!(restart.requests().is_empty());

    let notifications = sink.notifications();
    let failures = messages_of(&notifications, NotificationType::OperationFailure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Enrichment data is missing vserver.vserver-name"));
    assert_eq!(
        notifications.last().map(|n| n.notification),
        Some(NotificationType::FinalFailure)
    );
}

#[tokio::test]
async fn test_pnf_data_is_queried_once() {
    let sink = Arc::new(CollectingSink::new());
    let log = journal();
    let needs_pnf = vec!["AAI/pnf".to_string()];
    let pnf = json!({"pnf-name": "pnf-1", "pnf-id": "pnf-id-1", "ipaddress-v4-oam": "10.0.0.1"});

    let guard = RecordingOperator::journaled("GUARD", "Decision", vec![], OperatorOutput::success(None), &log);
    let aai_pnf = RecordingOperator::journaled("AAI", "Pnf", vec![], OperatorOutput::success(Some(pnf.clone())), &log);
    let reboot = RecordingOperator::journaled("SDNR", "Reboot", needs_pnf.clone(), OperatorOutput::success(None), &log);
    let modify = RecordingOperator::journaled(
        "SDNR",
        "ModifyConfig",
        needs_pnf,
        OperatorOutput::success(None),
        &log,
    );

    let controller = controller(register_all(&[&guard, &aai_pnf, &reboot, &modify]), sink.clone());
    let policy = chained_policy(
        json!({
            "id": "restart",
            "operation": {"actor": "SDNR", "operation": "Reboot", "target": {"targetType": "PNF"}},
            "success": "modify"
        }),
        json!({
            "id": "modify",
            "operation": {"actor": "SDNR", "operation": "ModifyConfig", "target": {"targetType": "PNF"}}
        }),
    );
    controller.add_tosca_policy(policy).unwrap();

    let event = ControlLoopEvent::onset(CL_NAME, Uuid::new_v4())
        .with_target(TargetType::Pnf, "pnf.pnf-name")
        .with_aai("pnf.pnf-name", "pnf-1");
    assert_eq!(controller.process_event(event), Dispatch::Created);
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(
        *log.lock(),
        vec!["AAI.Pnf", "GUARD.Decision", "SDNR.Reboot", "GUARD.Decision", "SDNR.ModifyConfig"]
    );

    let pnf_requests = aai_pnf.requests();
    assert_eq!(pnf_requests.len(), 1);
    assert_eq!(pnf_requests[0].target_entity.as_deref(), Some("pnf-1"));

    for op in [&reboot, &modify] {
        let requests = op.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target_entity.as_deref(), Some("pnf-1"));
        assert_eq!(requests[0].properties.get("AAI/pnf"), Some(&pnf));
    }

    // PNF targets carry no VNF fields in the guard query
    let guard_requests = guard.requests();
    assert_eq!(guard_requests[0].payload.get("target"), Some(&json!("pnf-1")));
    assert!(guard_requests[0].payload.get("vnfId").is_none());

    assert_eq!(
        sink.notifications().last().map(|n| n.notification),
        Some(NotificationType::FinalSuccess)
    );
}

#[tokio::test]
async fn test_vnf_name_target_runs_custom_query_first() {
    let sink = Arc::new(CollectingSink::new());
    let log = journal();

    let guard = RecordingOperator::journaled("GUARD", "Decision", vec![], OperatorOutput::success(None), &log);
    let custom_query = RecordingOperator::journaled(
        "AAI",
        "CustomQuery",
        vec![],
        OperatorOutput::success(Some(custom_query_with_modules(1))),
        &log,
    );
    let restart = RecordingOperator::journaled(
        "APPC",
        "Restart",
        vec!["AAI/default/genericVnf".to_string()],
        OperatorOutput::success(None),
        &log,
    );

    let controller = controller(register_all(&[&guard, &custom_query, &restart]), sink.clone());
    controller
        .add_tosca_policy(restart_policy(json!({
            "operation": {"actor": "APPC", "operation": "Restart", "target": {"targetType": "VNF"}}
        })))
        .unwrap();

    let event = ControlLoopEvent::onset(CL_NAME, Uuid::new_v4())
        .with_target(TargetType::Vnf, "generic-vnf.vnf-name")
        .with_aai("generic-vnf.vnf-name", "vnf-name-1");
    assert_eq!(controller.process_event(event), Dispatch::Created);
    assert!(controller.wait_idle(WAIT).await);

    // the query queued for the operation itself is served from the context
    assert_eq!(*log.lock(), vec!["AAI.CustomQuery", "GUARD.Decision", "APPC.Restart"]);

    let cq_requests = custom_query.requests();
    assert_eq!(cq_requests.len(), 1);
    assert_eq!(cq_requests[0].target_entity, None);

    let guard_requests = guard.requests();
    assert_eq!(guard_requests[0].payload.get("target"), Some(&json!("vnf-1")));
    assert_eq!(guard_requests[0].payload.get("vnfName"), Some(&json!("vnf-name-1")));

    let restart_requests = restart.requests();
    assert_eq!(restart_requests[0].target_entity.as_deref(), Some("vnf-1"));
    assert_eq!(
        restart_requests[0].properties["AAI/default/genericVnf"]["vnf-id"],
        json!("vnf-1")
    );

    let notifications = sink.notifications();
    assert!(messages_of(&notifications, NotificationType::Operation)
        .iter()
        .any(|m| m.starts_with("actor=APPC operation=Restart target=vnf-1")));
    assert_eq!(
        notifications.last().map(|n| n.notification),
        Some(NotificationType::FinalSuccess)
    );
}

#[tokio::test]
async fn test_too_many_steps_ends_in_final_failure() {
    let sink = Arc::new(CollectingSink::new());
    let settings = EngineSettings {
        max_steps: 2,
        ..EngineSettings::default()
    };
    let appc = Arc::new(SimulatedOperator::new("APPC", "Restart"));
    let controller = controller_with(
        settings,
        appc_actors(SimulatedOperator::new("GUARD", "Decision"), appc.clone()),
        sink.clone(),
    );
    controller.add_tosca_policy(restart_policy(json!({}))).unwrap();

    controller.process_event(vm_onset(Uuid::new_v4()));
    assert!(controller.wait_idle(WAIT).await);

    assert_eq!(appc.calls(), 0);
    assert!(controller.locks().is_empty());

    let notifications = sink.notifications();
    assert_eq!(
        kinds(&notifications),
        vec![
            NotificationType::Active,
            NotificationType::OperationFailure,
            NotificationType::FinalFailure,
        ]
    );
    assert!(notifications[1]
        .message
        .as_deref()
        .unwrap()
        .contains("message=too many steps"));
    assert_eq!(
        notifications[2].message.as_deref(),
        Some("Exception in processing closed loop")
    );
}

#[tokio::test]
async fn test_step_limit_counts_queued_custom_query() {
    let sink = Arc::new(CollectingSink::new());
    let settings = EngineSettings {
        max_steps: 4,
        ..EngineSettings::default()
    };
    let custom_query = RecordingOperator::new(
        "AAI",
        "CustomQuery",
        OperatorOutput::success(Some(custom_query_with_modules(1))),
    );
    let guard = RecordingOperator::new("GUARD", "Decision", OperatorOutput::success(None));
    let restart = RecordingOperator::new("APPC", "Restart", OperatorOutput::success(None));

    let controller = controller_with(settings, register_all(&[&custom_query, &guard, &restart]), sink.clone());
    controller
        .add_tosca_policy(restart_policy(json!({
            "operation": {"actor": "APPC", "operation": "Restart", "target": {"targetType": "VNF"}}
        })))
        .unwrap();

    // target lookup, lock, guard and the operation fill the limit exactly
    let event = ControlLoopEvent::onset(CL_NAME, Uuid::new_v4())
        .with_target(TargetType::Vnf, "generic-vnf.vnf-name")
        .with_aai("generic-vnf.vnf-name", "vnf-name-1");
    controller.process_event(event);
    assert!(controller.wait_idle(WAIT).await);

    assert!(custom_query.requests().is_empty());
    assert!(restart.requests().is_empty());

    let notifications = sink.notifications();
    let failures = messages_of(&notifications, NotificationType::OperationFailure);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("message=too many steps"));

    let last = notifications.last().unwrap();
    assert_eq!(last.notification, NotificationType::FinalFailure);
    assert_eq!(last.message.as_deref(), Some("Exception in processing closed loop"));
}
