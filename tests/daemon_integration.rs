//! Dispatcher-level integration tests against a scripted mock browser.
//!
//! The mock speaks just enough CDP: it answers Target discovery/attach,
//! domain enables, and a handful of scripted methods, and it can inject
//! arbitrary events on demand. Tests drive the daemon through
//! `dispatch::dispatch` exactly as the IPC server would.

#![allow(clippy::needless_pass_by_value)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use webctl::cdp::{CdpClient, CdpConfig};
use webctl::config::DaemonConfig;
use webctl::daemon::buffers::{ConsoleBuffer, NetworkBuffer};
use webctl::daemon::session::SessionManager;
use webctl::daemon::{DaemonState, ShutdownLatch, collectors, dispatch};
use webctl::protocol::Request;

// =============================================================================
// Mock browser
// =============================================================================

#[derive(Clone)]
struct MockPage {
    target_id: &'static str,
    url: &'static str,
    title: &'static str,
}

/// Start a mock browser endpoint. Returns the address and a sender for
/// injecting events.
async fn start_mock_browser(pages: Vec<MockPage>) -> (SocketAddr, mpsc::Sender<Value>) {
    let (event_tx, mut event_rx) = mpsc::channel::<Value>(64);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut source) = ws.split();

        loop {
            tokio::select! {
                msg = source.next() => {
                    let Some(Ok(Message::Text(text))) = msg else { break };
                    let cmd: Value = serde_json::from_str(&text).unwrap();
                    for frame in respond(&cmd, &pages) {
                        sink.send(Message::Text(frame.to_string().into()))
                            .await
                            .unwrap();
                    }
                }
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    sink.send(Message::Text(event.to_string().into()))
                        .await
                        .unwrap();
                }
            }
        }
    });

    (addr, event_tx)
}

/// Frames to send back for one request: the reply, plus any events the
/// real browser would emit as a side effect.
fn respond(cmd: &Value, pages: &[MockPage]) -> Vec<Value> {
    let id = cmd["id"].clone();
    let method = cmd["method"].as_str().unwrap_or("");
    let session_id = cmd.get("sessionId").cloned();

    let reply = |result: Value| {
        let mut frame = json!({"id": id.clone(), "result": result});
        if let Some(sid) = &session_id {
            frame["sessionId"] = sid.clone();
        }
        frame
    };

    match method {
        "Target.setDiscoverTargets" => {
            let mut frames = vec![reply(json!({}))];
            for page in pages {
                frames.push(json!({
                    "method": "Target.targetCreated",
                    "params": {"targetInfo": {
                        "targetId": page.target_id,
                        "type": "page",
                        "url": page.url,
                        "title": page.title,
                        "attached": false,
                    }}
                }));
            }
            frames
        }
        "Target.attachToTarget" => {
            let target_id = cmd["params"]["targetId"].as_str().unwrap_or("");
            let page = pages.iter().find(|p| p.target_id == target_id);
            let session = format!("sess-{target_id}");
            let mut frames = vec![reply(json!({"sessionId": session.clone()}))];
            if let Some(page) = page {
                frames.push(json!({
                    "method": "Target.attachedToTarget",
                    "params": {
                        "sessionId": session,
                        "targetInfo": {
                            "targetId": page.target_id,
                            "type": "page",
                            "url": page.url,
                            "title": page.title,
                            "attached": true,
                        },
                        "waitingForDebugger": false,
                    }
                }));
            }
            frames
        }
        "Runtime.evaluate" => {
            let expression = cmd["params"]["expression"].as_str().unwrap_or("");
            if expression.contains("document.title") {
                let sid = session_id
                    .as_ref()
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let title = pages
                    .iter()
                    .find(|p| format!("sess-{}", p.target_id) == sid)
                    .map_or("", |p| p.title);
                vec![reply(json!({"result": {"type": "string", "value": title}}))]
            } else if expression.contains("readyState") {
                vec![reply(json!({"result": {"type": "boolean", "value": true}}))]
            } else {
                vec![reply(json!({"result": {"type": "string", "value": "ok"}}))]
            }
        }
        "Page.navigate" => {
            let url = cmd["params"]["url"].as_str().unwrap_or("");
            if url.contains("unresolvable") {
                vec![reply(
                    json!({"frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED"}),
                )]
            } else {
                vec![reply(json!({"frameId": "F1"}))]
            }
        }
        "DOM.getDocument" => vec![reply(json!({"root": {"nodeId": 1}}))],
        "DOM.querySelector" => {
            let selector = cmd["params"]["selector"].as_str().unwrap_or("");
            let node_id = if selector.contains("missing") { 0 } else { 42 };
            vec![reply(json!({"nodeId": node_id}))]
        }
        "DOM.getBoxModel" => vec![reply(json!({
            "model": {"content": [10.0, 10.0, 110.0, 10.0, 110.0, 60.0, 10.0, 60.0]}
        }))],
        // Domain enables and everything else succeed with an empty result.
        _ => vec![reply(json!({}))],
    }
}

// =============================================================================
// Daemon state under test
// =============================================================================

async fn daemon_state(pages: Vec<MockPage>) -> (Arc<DaemonState>, mpsc::Sender<Value>) {
    let (addr, event_tx) = start_mock_browser(pages).await;
    let client = Arc::new(
        CdpClient::connect(
            &format!("ws://{addr}"),
            CdpConfig {
                connect_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(5),
                channel_capacity: 256,
            },
        )
        .await
        .unwrap(),
    );

    let sessions = Arc::new(SessionManager::new());
    let console = Arc::new(ConsoleBuffer::default());
    let network = Arc::new(NetworkBuffer::default());

    collectors::spawn_console_collector(&client, Arc::clone(&console))
        .await
        .unwrap();
    collectors::spawn_network_collector(&client, Arc::clone(&network), Arc::clone(&sessions))
        .await
        .unwrap();
    collectors::spawn_target_collector(Arc::clone(&client), Arc::clone(&sessions))
        .await
        .unwrap();

    client
        .send(
            "Target.setDiscoverTargets",
            Some(json!({"discover": true})),
            None,
        )
        .await
        .unwrap();

    // Wait for the collector to attach every page, then a beat more so the
    // initial domain enables settle.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sessions.session_count() == 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let dir = std::env::temp_dir().join(format!("webctl-test-{}", std::process::id()));
    let (reload_tx, _reload_rx) = mpsc::channel(4);
    let state = Arc::new(DaemonState {
        config: DaemonConfig {
            headless: true,
            cdp_port: 0,
            browser_path: None,
            socket_path: dir.join("test.sock"),
            pidfile_path: dir.join("test.pid"),
            browser_pidfile_path: dir.join("test-browser.pid"),
            debug: false,
        },
        client,
        sessions,
        console,
        network,
        shutdown: ShutdownLatch::new(),
        started_at: std::time::Instant::now(),
        browser_pid: 0,
        cdp_port: 9222,
        dev_server: Mutex::new(None),
        reload_tx,
    });
    (state, event_tx)
}

fn request(cmd: &str, params: Value) -> Request {
    Request {
        cmd: cmd.into(),
        params,
        json: true,
    }
}

fn example_pages() -> Vec<MockPage> {
    vec![MockPage {
        target_id: "T1",
        url: "https://example.com/",
        title: "Example Domain",
    }]
}

fn two_example_pages() -> Vec<MockPage> {
    vec![
        MockPage {
            target_id: "T1",
            url: "https://example.com/",
            title: "Example",
        },
        MockPage {
            target_id: "T2",
            url: "https://example.com/two",
            title: "Example Two",
        },
    ]
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn startup_attaches_and_elects_active_session() {
    let (state, _events) = daemon_state(example_pages()).await;
    assert_eq!(state.sessions.session_count(), 1);
    let active = state.sessions.active().unwrap();
    assert_eq!(active.target_id, "T1");
    assert_eq!(active.title, "Example Domain");
    // Initial domains were claimed at attach; Network was not.
    assert!(state.sessions.domain_enabled(&active.id, "Runtime"));
    assert!(state.sessions.domain_enabled(&active.id, "Page"));
    assert!(state.sessions.domain_enabled(&active.id, "DOM"));
    assert!(!state.sessions.domain_enabled(&active.id, "Network"));
}

/// Scenario A (mocked): navigate, then read the title via eval.
#[tokio::test]
async fn navigate_then_eval_title() {
    let (state, _events) = daemon_state(example_pages()).await;

    let response = dispatch::dispatch(&state, request("navigate", json!({"url": "example.com"}))).await;
    assert!(response.ok, "navigate failed: {:?}", response.error);
    assert_eq!(
        response.data.unwrap()["url"].as_str().unwrap(),
        "https://example.com"
    );

    let response = dispatch::dispatch(
        &state,
        request("eval", json!({"expression": "document.title"})),
    )
    .await;
    assert!(response.ok);
    assert_eq!(response.data.unwrap()["value"], "Example Domain");
}

#[tokio::test]
async fn navigation_error_text_is_surfaced() {
    let (state, _events) = daemon_state(example_pages()).await;
    let response = dispatch::dispatch(
        &state,
        request("navigate", json!({"url": "https://unresolvable.test/"})),
    )
    .await;
    assert!(!response.ok);
    assert!(
        response
            .error
            .unwrap()
            .contains("net::ERR_NAME_NOT_RESOLVED")
    );
}

/// Scenario C: console filtering, tail slicing, clear.
#[tokio::test]
async fn console_filter_tail_and_clear() {
    let (state, events) = daemon_state(example_pages()).await;
    let sid = state.sessions.active_id().unwrap();

    for (level, text) in [("log", "a"), ("warning", "b"), ("error", "c")] {
        events
            .send(json!({
                "method": "Runtime.consoleAPICalled",
                "sessionId": sid,
                "params": {
                    "type": level,
                    "args": [{"type": "string", "value": text}],
                    "timestamp": 1_772_368_245_000.0_f64,
                }
            }))
            .await
            .unwrap();
    }

    // Let the collector drain the events.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = dispatch::dispatch(
        &state,
        request(
            "console",
            json!({"filter": {"types": ["error"], "find": "c"}}),
        ),
    )
    .await;
    assert!(response.ok);
    let data = response.data.unwrap();
    assert_eq!(data["count"], 1);
    assert!(data["entries"][0]["message"].as_str().unwrap().contains('c'));

    let response = dispatch::dispatch(
        &state,
        request("console", json!({"slice": {"tail": 1}})),
    )
    .await;
    let data = response.data.unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["entries"][0]["type"], "error");

    let response = dispatch::dispatch(&state, request("clear", json!({"kind": "console"}))).await;
    assert!(response.ok);

    let response = dispatch::dispatch(&state, request("console", json!({}))).await;
    assert_eq!(response.data.unwrap()["count"], 0);
}

/// Scenario E: ambiguous target query, then exact switch.
#[tokio::test]
async fn ambiguous_target_then_exact_switch() {
    let (state, _events) = daemon_state(two_example_pages()).await;
    assert_eq!(state.sessions.session_count(), 2);
    let initially_active = state.sessions.active_id().unwrap();

    let response = dispatch::dispatch(&state, request("target", json!({"query": "Example"}))).await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert!(error.contains("ambiguous"), "got: {error}");
    assert_eq!(state.sessions.active_id().unwrap(), initially_active);

    let response =
        dispatch::dispatch(&state, request("target", json!({"query": "Example Two"}))).await;
    assert!(response.ok);
    assert_eq!(
        response.data.unwrap()["switched"]["target_id"],
        "T2"
    );

    let response = dispatch::dispatch(
        &state,
        request("eval", json!({"expression": "document.title"})),
    )
    .await;
    assert_eq!(response.data.unwrap()["value"], "Example Two");
}

/// Scenario D (mocked): ready --network-idle waits for the sustained
/// zero-pending window.
#[tokio::test]
async fn network_idle_waits_for_sustained_window() {
    let (state, events) = daemon_state(example_pages()).await;
    let sid = state.sessions.active_id().unwrap();

    // One in-flight request that finishes 200ms from now.
    events
        .send(json!({
            "method": "Network.requestWillBeSent",
            "sessionId": sid,
            "params": {
                "requestId": "r1",
                "timestamp": 1.0,
                "wallTime": 1_772_368_245.0,
                "type": "Fetch",
                "request": {"url": "https://example.com/slow", "method": "GET", "headers": {}},
            }
        }))
        .await
        .unwrap();

    // Let the collector record the pending request before the wait starts.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let finisher = {
        let events = events.clone();
        let sid = sid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            events
                .send(json!({
                    "method": "Network.loadingFinished",
                    "sessionId": sid,
                    "params": {"requestId": "r1", "timestamp": 1.2, "encodedDataLength": 10},
                }))
                .await
                .unwrap();
        })
    };

    let started = std::time::Instant::now();
    let response = dispatch::dispatch(
        &state,
        request("ready", json!({"network_idle": true, "timeout_ms": 5000})),
    )
    .await;
    let elapsed = started.elapsed();
    finisher.await.unwrap();

    assert!(response.ok, "ready failed: {:?}", response.error);
    // 200ms of pending request plus the 500ms idle window.
    assert!(
        elapsed >= Duration::from_millis(650),
        "returned too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(2500),
        "returned too late: {elapsed:?}"
    );
}

#[tokio::test]
async fn ready_times_out_when_never_idle() {
    let (state, events) = daemon_state(example_pages()).await;
    let sid = state.sessions.active_id().unwrap();

    events
        .send(json!({
            "method": "Network.requestWillBeSent",
            "sessionId": sid,
            "params": {
                "requestId": "hung",
                "timestamp": 1.0,
                "wallTime": 1_772_368_245.0,
                "type": "Fetch",
                "request": {"url": "https://example.com/hung", "method": "GET", "headers": {}},
            }
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = dispatch::dispatch(
        &state,
        request("ready", json!({"network_idle": true, "timeout_ms": 700})),
    )
    .await;
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("network idle"));
}

#[tokio::test]
async fn network_enable_is_lazy_and_once() {
    let (state, _events) = daemon_state(example_pages()).await;
    let sid = state.sessions.active_id().unwrap();
    assert!(!state.sessions.domain_enabled(&sid, "Network"));

    let response = dispatch::dispatch(&state, request("network", json!({}))).await;
    assert!(response.ok);
    assert!(state.sessions.domain_enabled(&sid, "Network"));

    // Second read: still enabled, still fine.
    let response = dispatch::dispatch(&state, request("network", json!({}))).await;
    assert!(response.ok);
}

#[tokio::test]
async fn unknown_command_is_invalid_argument() {
    let (state, _events) = daemon_state(example_pages()).await;
    let response = dispatch::dispatch(&state, request("frobnicate", json!({}))).await;
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("unknown command"));
}

#[tokio::test]
async fn slice_conflict_is_rejected() {
    let (state, _events) = daemon_state(example_pages()).await;
    let response = dispatch::dispatch(
        &state,
        request("console", json!({"slice": {"head": 2, "tail": 2}})),
    )
    .await;
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("mutually exclusive"));
}

#[tokio::test]
async fn status_reports_sessions() {
    let (state, _events) = daemon_state(two_example_pages()).await;
    let response = dispatch::dispatch(&state, request("status", json!({}))).await;
    assert!(response.ok);
    let data = response.data.unwrap();
    assert_eq!(data["running"], true);
    assert_eq!(data["cdp_port"], 9222);
    assert_eq!(data["sessions"].as_array().unwrap().len(), 2);
    assert!(data["active_url"].as_str().is_some());
}

/// Connection loss: the daemon reports BrowserConnectionLost, clears
/// sessions, and fires the shutdown latch.
#[tokio::test]
async fn connection_loss_triggers_shutdown() {
    let (state, events) = daemon_state(example_pages()).await;

    // Dropping the event sender tears down the mock server loop and with
    // it the WebSocket.
    drop(events);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = dispatch::dispatch(
        &state,
        request("eval", json!({"expression": "1 + 1"})),
    )
    .await;
    assert!(!response.ok);
    assert!(
        response.error.unwrap().contains("browser connection lost"),
        "expected connection-loss error"
    );
    assert!(state.shutdown.is_fired());
    assert_eq!(state.sessions.session_count(), 0);
}

/// Scenario B (mocked): click resolves the element and dispatches the
/// press/release pair at the content-quad centre.
#[tokio::test]
async fn click_targets_the_element_centre() {
    let (state, _events) = daemon_state(example_pages()).await;
    let response =
        dispatch::dispatch(&state, request("click", json!({"selector": "#b"}))).await;
    assert!(response.ok, "click failed: {:?}", response.error);
    let data = response.data.unwrap();
    assert_eq!(data["x"], 60.0);
    assert_eq!(data["y"], 35.0);
}

#[tokio::test]
async fn click_on_missing_selector_is_element_not_found() {
    let (state, _events) = daemon_state(example_pages()).await;
    let response = dispatch::dispatch(
        &state,
        request("click", json!({"selector": "#missing-button"})),
    )
    .await;
    assert!(!response.ok);
    assert!(
        response
            .error
            .unwrap()
            .contains("no element matches selector")
    );
}

/// Property 10: deleting a cookie that matches zero or one entries
/// succeeds every time.
#[tokio::test]
async fn cookie_delete_is_idempotent() {
    let (state, _events) = daemon_state(example_pages()).await;

    for _ in 0..2 {
        let response = dispatch::dispatch(
            &state,
            request("cookies.delete", json!({"name": "absent"})),
        )
        .await;
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["deleted"], 0);
    }
}

#[tokio::test]
async fn detach_event_promotes_remaining_session() {
    let (state, events) = daemon_state(two_example_pages()).await;
    let first = state.sessions.active_id().unwrap();

    events
        .send(json!({
            "method": "Target.detachedFromTarget",
            "params": {"sessionId": first},
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(state.sessions.session_count(), 1);
    let promoted = state.sessions.active_id().unwrap();
    assert_ne!(promoted, first);
}
