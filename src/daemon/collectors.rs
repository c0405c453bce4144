//! Background tasks that fold CDP event streams into daemon state.
//!
//! Each collector owns one subscription receiver. Receivers close when the
//! connection is lost, which ends the task. Collectors never block: buffer
//! pushes and session-table updates are short lock-protected operations.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::cdp::CdpClient;
use crate::daemon::buffers::{ConsoleBuffer, ConsoleEntry, NetworkBuffer};
use crate::daemon::session::SessionManager;

/// Domains enabled on every session at attach time. `Network` is deliberately
/// absent: enabling it serialises other domains' replies behind network
/// lifecycle events, so it waits until a command actually needs it.
pub const INITIAL_DOMAINS: [&str; 3] = ["Runtime", "Page", "DOM"];

/// Feed the console buffer from `Runtime.consoleAPICalled` and
/// `Runtime.exceptionThrown`.
pub async fn spawn_console_collector(
    client: &CdpClient,
    buffer: Arc<ConsoleBuffer>,
) -> Result<(), crate::cdp::CdpError> {
    let mut console_rx = client.subscribe("Runtime.consoleAPICalled").await?;
    let mut exception_rx = client.subscribe("Runtime.exceptionThrown").await?;

    let console_buffer = Arc::clone(&buffer);
    tokio::spawn(async move {
        while let Some(event) = console_rx.recv().await {
            console_buffer.push(ConsoleEntry::from_console_event(&event.params));
        }
    });

    tokio::spawn(async move {
        while let Some(event) = exception_rx.recv().await {
            buffer.push(ConsoleEntry::from_exception_event(&event.params));
        }
    });

    Ok(())
}

/// Feed the network buffer and the per-session pending-request counts from
/// the four `Network.*` lifecycle events.
pub async fn spawn_network_collector(
    client: &CdpClient,
    buffer: Arc<NetworkBuffer>,
    sessions: Arc<SessionManager>,
) -> Result<(), crate::cdp::CdpError> {
    let mut request_rx = client.subscribe("Network.requestWillBeSent").await?;
    let mut response_rx = client.subscribe("Network.responseReceived").await?;
    let mut finished_rx = client.subscribe("Network.loadingFinished").await?;
    let mut failed_rx = client.subscribe("Network.loadingFailed").await?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = request_rx.recv() => {
                    let Some(event) = event else { break };
                    let session_id = event.session_id.as_deref().unwrap_or("");
                    if let Some(request_id) = event.params["requestId"].as_str() {
                        sessions.pending_insert(session_id, request_id);
                    }
                    buffer.on_request_will_be_sent(&event.params, session_id);
                }
                event = response_rx.recv() => {
                    let Some(event) = event else { break };
                    buffer.on_response_received(&event.params);
                }
                event = finished_rx.recv() => {
                    let Some(event) = event else { break };
                    let session_id = event.session_id.as_deref().unwrap_or("");
                    if let Some(request_id) = event.params["requestId"].as_str() {
                        sessions.pending_remove(session_id, request_id);
                    }
                    buffer.on_loading_finished(&event.params);
                }
                event = failed_rx.recv() => {
                    let Some(event) = event else { break };
                    let session_id = event.session_id.as_deref().unwrap_or("");
                    if let Some(request_id) = event.params["requestId"].as_str() {
                        sessions.pending_remove(session_id, request_id);
                    }
                    buffer.on_loading_failed(&event.params);
                }
            }
        }
        debug!("network collector stopped");
    });

    Ok(())
}

/// Track target lifecycle: attach to new page targets, record attachments,
/// drop detached sessions, and keep URL/title fresh.
pub async fn spawn_target_collector(
    client: Arc<CdpClient>,
    sessions: Arc<SessionManager>,
) -> Result<(), crate::cdp::CdpError> {
    let mut created_rx = client.subscribe("Target.targetCreated").await?;
    let mut destroyed_rx = client.subscribe("Target.targetDestroyed").await?;
    let mut attached_rx = client.subscribe("Target.attachedToTarget").await?;
    let mut detached_rx = client.subscribe("Target.detachedFromTarget").await?;
    let mut changed_rx = client.subscribe("Target.targetInfoChanged").await?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = created_rx.recv() => {
                    let Some(event) = event else { break };
                    let info = &event.params["targetInfo"];
                    if info["type"].as_str() == Some("page") {
                        let target_id = info["targetId"].as_str().unwrap_or("").to_owned();
                        if sessions.session_for_target(&target_id).is_none() {
                            attach_to_target(&client, &target_id).await;
                        }
                    }
                }
                event = attached_rx.recv() => {
                    let Some(event) = event else { break };
                    let session_id = event.params["sessionId"].as_str().unwrap_or("");
                    let info = &event.params["targetInfo"];
                    if info["type"].as_str() != Some("page") || session_id.is_empty() {
                        continue;
                    }
                    sessions.on_target_attached(
                        session_id,
                        info["targetId"].as_str().unwrap_or(""),
                        info["url"].as_str().unwrap_or(""),
                        info["title"].as_str().unwrap_or(""),
                    );
                    enable_initial_domains(&client, &sessions, session_id).await;
                }
                event = detached_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Some(session_id) = event.params["sessionId"].as_str() {
                        sessions.on_target_detached(session_id);
                    }
                }
                event = destroyed_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Some(target_id) = event.params["targetId"].as_str() {
                        if let Some(session_id) = sessions.session_for_target(target_id) {
                            sessions.on_target_detached(&session_id);
                        }
                    }
                }
                event = changed_rx.recv() => {
                    let Some(event) = event else { break };
                    let info = &event.params["targetInfo"];
                    if let Some(target_id) = info["targetId"].as_str() {
                        sessions.update_target_info(
                            target_id,
                            info["url"].as_str().unwrap_or(""),
                            info["title"].as_str().unwrap_or(""),
                        );
                    }
                }
            }
        }
        debug!("target collector stopped");
    });

    Ok(())
}

/// Attach a flattened session to a target. Best-effort: a target can vanish
/// between discovery and attach.
async fn attach_to_target(client: &CdpClient, target_id: &str) {
    let params = json!({ "targetId": target_id, "flatten": true });
    if let Err(e) = client.send("Target.attachToTarget", Some(params), None).await {
        warn!(target_id, error = %e, "could not attach to target");
    }
}

/// Send the initial domain enables for a fresh session.
pub async fn enable_initial_domains(
    client: &CdpClient,
    sessions: &SessionManager,
    session_id: &str,
) {
    for domain in sessions.claim_domains(session_id, &INITIAL_DOMAINS) {
        let method = format!("{domain}.enable");
        if let Err(e) = client.send(&method, None, Some(session_id)).await {
            warn!(session_id, domain, error = %e, "domain enable failed");
        }
    }
}
