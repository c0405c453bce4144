//! Synchronisation primitive: wait for network idle, a truthy expression,
//! a selector, or page load.

use serde_json::{Value, json};
use tokio::time::{Duration, Instant};

use super::{DEFAULT_WAIT_TIMEOUT_MS, cdp, ensure_network, require_browser};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::ReadyParams;

/// Poll cadence for the network-idle mode.
const IDLE_POLL: Duration = Duration::from_millis(50);
/// How long the pending-request count must stay at zero.
const IDLE_WINDOW: Duration = Duration::from_millis(500);
/// Poll cadence for expression and selector modes.
const POLL: Duration = Duration::from_millis(100);

pub async fn ready(state: &DaemonState, params: ReadyParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS));
    let deadline = Instant::now() + timeout;

    // Mode priority: network idle, expression, selector, page load.
    if params.network_idle {
        return network_idle(state, &session_id, deadline).await;
    }
    if let Some(expression) = &params.eval {
        return eval_truthy(state, &session_id, expression, deadline).await;
    }
    if let Some(selector) = &params.selector {
        return selector_present(state, &session_id, selector, deadline).await;
    }
    page_load(state, &session_id, deadline).await
}

/// Zero pending requests, sustained for the full idle window.
async fn network_idle(
    state: &DaemonState,
    session_id: &str,
    deadline: Instant,
) -> Result<Value, DaemonError> {
    ensure_network(state, session_id).await?;

    let mut idle_since: Option<Instant> = None;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(DaemonError::Timeout {
                what: "network idle".into(),
            });
        }

        if state.sessions.pending_count(session_id) == 0 {
            let since = *idle_since.get_or_insert(now);
            if now.duration_since(since) >= IDLE_WINDOW {
                return Ok(json!({"ready": "network-idle"}));
            }
        } else {
            idle_since = None;
        }

        tokio::time::sleep(IDLE_POLL).await;
    }
}

/// Poll an expression until it evaluates truthy. Evaluation errors count
/// as "not yet ready", not as failure.
async fn eval_truthy(
    state: &DaemonState,
    session_id: &str,
    expression: &str,
    deadline: Instant,
) -> Result<Value, DaemonError> {
    loop {
        if Instant::now() >= deadline {
            return Err(DaemonError::Timeout {
                what: format!("expression to be truthy: {expression}"),
            });
        }

        let result = cdp(
            state,
            "Runtime.evaluate",
            Some(json!({"expression": expression, "returnByValue": true})),
            Some(session_id),
        )
        .await;

        match result {
            Ok(value) if value.get("exceptionDetails").is_none() => {
                if is_truthy(&value["result"]) {
                    return Ok(json!({"ready": "eval"}));
                }
            }
            Ok(_) => {}
            Err(e @ DaemonError::BrowserConnectionLost) => return Err(e),
            Err(_) => {}
        }

        tokio::time::sleep(POLL).await;
    }
}

/// JavaScript truthiness over a CDP `RemoteObject`.
fn is_truthy(remote: &Value) -> bool {
    match remote["type"].as_str() {
        Some("boolean") => remote["value"].as_bool() == Some(true),
        Some("number") => remote["value"].as_f64().is_some_and(|n| n != 0.0),
        Some("string") => remote["value"].as_str().is_some_and(|s| !s.is_empty()),
        Some("object") => !remote["subtype"].as_str().is_some_and(|s| s == "null"),
        Some("function" | "symbol" | "bigint") => true,
        _ => false,
    }
}

/// Poll a selector until it matches a node.
async fn selector_present(
    state: &DaemonState,
    session_id: &str,
    selector: &str,
    deadline: Instant,
) -> Result<Value, DaemonError> {
    loop {
        if Instant::now() >= deadline {
            return Err(DaemonError::Timeout {
                what: format!("selector to appear: {selector}"),
            });
        }

        // Re-resolve the document each poll; navigations replace it.
        match super::resolve_node(state, session_id, selector).await {
            Ok(_) => return Ok(json!({"ready": "selector"})),
            Err(e @ DaemonError::BrowserConnectionLost) => return Err(e),
            Err(_) => {}
        }

        tokio::time::sleep(POLL).await;
    }
}

/// Succeed immediately if the document is already complete, otherwise wait
/// for the load event.
async fn page_load(
    state: &DaemonState,
    session_id: &str,
    deadline: Instant,
) -> Result<Value, DaemonError> {
    let result = cdp(
        state,
        "Runtime.evaluate",
        Some(json!({
            "expression": "document.readyState === 'complete'",
            "returnByValue": true,
        })),
        Some(session_id),
    )
    .await?;
    if result["result"]["value"].as_bool() == Some(true) {
        return Ok(json!({"ready": "load", "already": true}));
    }

    let mut rx = state
        .client
        .subscribe("Page.loadEventFired")
        .await
        .map_err(DaemonError::from)?;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) if event.session_id.as_deref() == Some(session_id) => {
                        return Ok(json!({"ready": "load", "already": false}));
                    }
                    Some(_) => {}
                    None => return Err(DaemonError::BrowserConnectionLost),
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                return Err(DaemonError::Timeout { what: "page load".into() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_rules() {
        assert!(is_truthy(&json!({"type": "boolean", "value": true})));
        assert!(!is_truthy(&json!({"type": "boolean", "value": false})));

        assert!(is_truthy(&json!({"type": "number", "value": 5})));
        assert!(!is_truthy(&json!({"type": "number", "value": 0})));

        assert!(is_truthy(&json!({"type": "string", "value": "x"})));
        assert!(!is_truthy(&json!({"type": "string", "value": ""})));

        assert!(is_truthy(&json!({"type": "object", "className": "Array"})));
        assert!(!is_truthy(&json!({"type": "object", "subtype": "null"})));

        assert!(!is_truthy(&json!({"type": "undefined"})));
        assert!(is_truthy(&json!({"type": "function"})));
    }
}
