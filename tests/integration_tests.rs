//! Integration tests covering the literal end-to-end scenarios this
//! engine is expected to handle: an incoming call routed through a flow,
//! ring-timeout and SIP header injection on outbound origination, DTMF
//! routing through `ProcessInputModel`/`SwitchModel`, the free-trial
//! gate, and runner-cancellation cleanup.
//!
//! Ground: `examples/eisenzopf-rvoip/crates/call-engine/tests/integration_tests.rs`
//! (`#[tokio::test]`, `#[serial]`, a `create_test_*` async helper per
//! test, assertions against observable state rather than internals).
//! The management API is mocked with `wiremock` (listed but unused in
//! the teacher workspace's sibling `auth-core` crate; used here for its
//! stated purpose) since `ApiClient` is a concrete `reqwest`-backed
//! struct, not a trait swapped out in tests.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use serde_json::json;
use tokio::sync::RwLock;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{wait_until, FakeGateway};
use lineblocs_call_engine::api_client::ApiClient;
use lineblocs_call_engine::cache::InMemoryConferenceCache;
use lineblocs_call_engine::config::EngineConfig;
use lineblocs_call_engine::dispatcher::Dispatcher;
use lineblocs_call_engine::gateway::{ChannelId, GatewayClient, GatewayEvent};
use lineblocs_call_engine::interpreter::{Interpreter, OnTerminal};
use lineblocs_call_engine::model::{Cell, CellId, CellKind, Flow, Link, ModelData, Runner, User};
use lineblocs_call_engine::supervisor::{self, DialOutcome, EnsureBridgeRequest};

fn test_config() -> EngineConfig {
    EngineConfig {
        ari_host: "test-gateway".to_string(),
        ari_username: String::new(),
        ari_password: String::new(),
        ari_use_proxy: false,
        natsgw_url: None,
        application: "lineblocs".to_string(),
        proxy_host: Some("proxy.example.com".to_string()),
        lineblocs_key: Some("test-key".to_string()),
        deployment_domain: "lineblocs.com".to_string(),
        management_api_base: "https://unused.invalid".to_string(),
    }
}

/// Scenario 1: `INCOMING_CALL` happy path. A `StasisStart` with
/// `args[0] == "INCOMING_CALL"` answers the channel, fetches the DID's
/// flow, runs it (a `LaunchModel` fanning into a terminal
/// `SetVariablesModel`), and hangs up once the flow reaches its end.
#[tokio::test]
#[serial]
async fn incoming_call_runs_flow_and_hangs_up_on_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/getDIDNumberData"))
        .and(query_param("did", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "plan": "active",
            "user_id": 1,
            "workspace_id": 7,
            "workspace_name": "acme",
            "flow": {
                "rootCell": "launch",
                "cells": [
                    {
                        "name": "launch",
                        "type": "LaunchModel",
                        "links": [{"port": "default", "target": "greet"}]
                    },
                    {
                        "name": "greet",
                        "type": "SetVariablesModel",
                        "data": { "greeting": { "type": "str", "value": "hello" } },
                        "links": []
                    }
                ]
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/getWorkspaceMacros"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/call/createCall"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-call-id", "501"))
        .mount(&mock_server)
        .await;

    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new(mock_server.uri()));
    let cache = Arc::new(InMemoryConferenceCache::new());
    let config = Arc::new(test_config());

    let dispatcher = Dispatcher::new(
        gateway.clone(),
        api,
        cache,
        config,
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = dispatcher.run(shutdown_rx).await;
    });

    let in_channel = ChannelId("inbound-1".to_string());
    gateway.push_event(GatewayEvent::StasisStart {
        channel_id: in_channel.clone(),
        args: vec![
            "INCOMING_CALL".to_string(),
            "1000".to_string(),
            "5551234".to_string(),
        ],
    });

    assert!(
        wait_until(|| gateway.answered.lock().contains(&in_channel), Duration::from_secs(2)).await,
        "channel should have been answered"
    );
    assert!(
        wait_until(|| gateway.hung_up.lock().contains(&in_channel), Duration::from_secs(2)).await,
        "channel should have been hung up once the flow reached its terminal cell"
    );
}

/// Scenario 2: ring timeout. With no `StasisStart` ever observed on the
/// outbound leg, `ensure_bridge` must time out and safely hang up both
/// legs rather than hang forever.
#[tokio::test]
#[serial]
async fn ensure_bridge_times_out_when_far_end_never_answers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call/createCall"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-call-id", "900"))
        .mount(&mock_server)
        .await;

    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new(mock_server.uri()));
    let user = User::new(1, 7, "acme");
    let in_channel = ChannelId("inbound-ring".to_string());

    let mut req = EnsureBridgeRequest::bridge(
        &user,
        &in_channel,
        "15550000",
        "15551111",
        "extension",
        Vec::new(),
        "proxy.example.com",
        "test-key",
    );
    req.ring_timeout = Duration::from_millis(50);

    let gateway_dyn: Arc<dyn GatewayClient> = gateway.clone();
    let (outcome, _bridge_id) = supervisor::ensure_bridge(&gateway_dyn, &api, req)
        .await
        .expect("ensure_bridge should not error even on timeout");

    assert_eq!(outcome, DialOutcome::NoAnswer);

    let outbound = gateway
        .dialed
        .lock()
        .last()
        .expect("outbound leg should have been dialed")
        .channel
        .clone();
    assert!(gateway.hung_up.lock().contains(&in_channel));
    assert!(gateway.hung_up.lock().contains(&outbound));
}

/// Scenario 3: SIP trunk header injection. `ProcessSIPTrunkCall`'s
/// origination must carry the trunk address and trunk marker alongside
/// the standard fixed headers, and the headers must actually reach
/// `channel_start_dial` (not just be logged — see DESIGN.md).
#[tokio::test]
#[serial]
async fn sip_trunk_call_carries_trunk_headers_on_dial() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call/createCall"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-call-id", "42"))
        .mount(&mock_server)
        .await;

    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new(mock_server.uri()));
    let user = User::new(2, 9, "globex");
    let in_channel = ChannelId("inbound-trunk".to_string());

    let mut req = EnsureBridgeRequest::sip_trunk(
        &user,
        &in_channel,
        "15559999",
        "2000",
        "10.0.0.5",
        "proxy.example.com",
        "trunk-secret",
    );
    req.ring_timeout = Duration::from_millis(50);

    let gateway_dyn: Arc<dyn GatewayClient> = gateway.clone();
    supervisor::ensure_bridge(&gateway_dyn, &api, req)
        .await
        .expect("ensure_bridge should not error even on timeout");

    let dialed = gateway.dialed.lock().last().cloned().expect("a dial should have happened");
    assert_eq!(
        dialed.variables.get("SIPADDHEADER0").unwrap(),
        "X-LineBlocs-Key: trunk-secret"
    );
    assert_eq!(
        dialed.variables.get("SIPADDHEADER3").unwrap(),
        "X-LineBlocs-Caller: 15559999"
    );
    assert_eq!(
        dialed.variables.get("SIPADDHEADER4").unwrap(),
        "X-LineBlocs-API-CallId: 42"
    );
    assert_eq!(
        dialed.variables.get("SIPADDHEADER5").unwrap(),
        "X-Lineblocs-User-SIP-Trunk-Addr: 10.0.0.5"
    );
    assert_eq!(
        dialed.variables.get("SIPADDHEADER6").unwrap(),
        "X-Lineblocs-User-SIP-Trunk: true"
    );
}

/// Scenario 4: `ProcessInputModel` collecting digits and routing through
/// `SwitchModel` by the collected value.
#[tokio::test]
#[serial]
async fn process_input_digits_route_through_switch() {
    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new("http://unused.invalid".to_string()));
    let cache = Arc::new(InMemoryConferenceCache::new());
    let config = Arc::new(test_config());

    let collect_id = CellId(0);
    let route_id = CellId(1);
    let matched_id = CellId(2);
    let fallback_id = CellId(3);

    let mut cells = HashMap::new();
    cells.insert(
        collect_id,
        Cell::new(
            collect_id,
            "collect",
            CellKind::ProcessInput {
                max_len: 4,
                terminator: '#',
                timeout_ms: 3000,
            },
        ),
    );
    cells.insert(
        route_id,
        Cell::new(
            route_id,
            "route",
            CellKind::Switch {
                on: "digits".to_string(),
                cases: vec![("1234".to_string(), "match_port".to_string())],
            },
        )
        .with_data("digits", ModelData::Str("{{collect.digits}}".to_string())),
    );
    cells.insert(
        matched_id,
        Cell::new(
            matched_id,
            "matched_case",
            CellKind::SetVariables {
                values: HashMap::from([("routed".to_string(), ModelData::Str("matched".to_string()))]),
            },
        ),
    );
    cells.insert(
        fallback_id,
        Cell::new(
            fallback_id,
            "fallback",
            CellKind::SetVariables {
                values: HashMap::from([("routed".to_string(), ModelData::Str("fallback".to_string()))]),
            },
        ),
    );

    let links = vec![
        Link {
            source: collect_id,
            source_port: "matched".to_string(),
            target: route_id,
            target_port: "default".to_string(),
        },
        Link {
            source: route_id,
            source_port: "match_port".to_string(),
            target: matched_id,
            target_port: "default".to_string(),
        },
        Link {
            source: route_id,
            source_port: "default".to_string(),
            target: fallback_id,
            target_port: "default".to_string(),
        },
    ];

    let user = User::new(3, 11, "initech");
    let flow = Flow::new(
        "test-flow",
        user,
        collect_id,
        cells,
        links,
        gateway.clone(),
    );
    let shared_flow = Arc::new(RwLock::new(flow));

    let interpreter = Interpreter::new(
        gateway.clone(),
        api,
        cache,
        config,
    );
    let channel = ChannelId("dtmf-channel".to_string());
    let runner = { shared_flow.write().await.spawn_runner() };

    let shared_flow2 = shared_flow.clone();
    let interp2 = interpreter.clone();
    let channel2 = channel.clone();
    let run_task = tokio::spawn(async move {
        interp2
            .run(shared_flow2, channel2, collect_id, runner, OnTerminal::Hangup)
            .await
    });

    // Give the ProcessInput handler time to subscribe before sending
    // digits (subscribe-before-trigger).
    tokio::time::sleep(Duration::from_millis(50)).await;
    for digit in ['1', '2', '3', '4'] {
        gateway.push_event(GatewayEvent::ChannelDtmfReceived {
            channel_id: channel.clone(),
            digit,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), run_task)
        .await
        .expect("interpreter run should finish")
        .expect("interpreter task should not panic");

    let flow = shared_flow.read().await;
    assert_eq!(
        flow.cells[&matched_id].event_vars.get("routed").map(String::as_str),
        Some("matched")
    );
    assert!(flow.cells[&fallback_id].event_vars.is_empty());
}

/// Scenario 5: a DID on an expired plan ends the call without ever
/// building a flow or answering the channel.
#[tokio::test]
#[serial]
async fn expired_plan_ends_call_without_answering() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/getDIDNumberData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "plan": "expired",
            "user_id": 4,
            "workspace_id": 13,
            "workspace_name": "umbrella",
            "flow": { "rootCell": "x", "cells": [] }
        })))
        .mount(&mock_server)
        .await;

    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new(mock_server.uri()));
    let cache = Arc::new(InMemoryConferenceCache::new());
    let config = Arc::new(test_config());

    let dispatcher = Dispatcher::new(
        gateway.clone(),
        api,
        cache,
        config,
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = dispatcher.run(shutdown_rx).await;
    });

    let channel = ChannelId("trial-expired".to_string());
    gateway.push_event(GatewayEvent::StasisStart {
        channel_id: channel.clone(),
        args: vec![
            "INCOMING_CALL".to_string(),
            "2000".to_string(),
            "5559999".to_string(),
        ],
    });

    assert!(
        wait_until(|| gateway.hung_up.lock().contains(&channel), Duration::from_secs(2)).await,
        "call on an expired plan should be hung up"
    );
    assert!(
        !gateway.answered.lock().contains(&channel),
        "a call rejected for an expired plan should never be answered"
    );
}

/// Scenario 6: a cancelled runner must make `ProcessInputModel` return
/// its terminal response immediately and cancel its DTMF subscription,
/// rather than block waiting for digits that will never come.
#[tokio::test]
#[serial]
async fn cancelled_runner_short_circuits_process_input() {
    let gateway = FakeGateway::new();
    let api = Arc::new(ApiClient::new("http://unused.invalid".to_string()));
    let cache = Arc::new(InMemoryConferenceCache::new());
    let config = Arc::new(test_config());

    let cell_id = CellId(0);
    let mut cells = HashMap::new();
    cells.insert(
        cell_id,
        Cell::new(
            cell_id,
            "collect",
            CellKind::ProcessInput {
                max_len: 4,
                terminator: '#',
                timeout_ms: 30_000,
            },
        ),
    );
    let user = User::new(5, 21, "soylent");
    let flow = Flow::new(
        "cancel-test",
        user,
        cell_id,
        cells,
        Vec::new(),
        gateway.clone(),
    );
    let shared_flow = Arc::new(RwLock::new(flow));

    let runner = Runner::new();
    runner.cancel();

    let ctx = lineblocs_call_engine::cells::HandlerContext {
        gateway: gateway.clone(),
        api,
        conference_cache: cache,
        config,
        flow: shared_flow,
        cell_id,
        runner,
        channel: ChannelId("cancelled-channel".to_string()),
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handled = tokio::time::timeout(Duration::from_millis(300), async move {
        lineblocs_call_engine::cells::process_input::run(ctx, tx).await;
        rx.await
    })
    .await
    .expect("a cancelled runner must not block on DTMF input")
    .expect("the handler must publish a response even when cancelled");

    assert_eq!(handled.next, None);
}
