//! Command handlers.
//!
//! Every browser-touching handler starts with [`require_browser`]; handlers
//! that read the network buffer or issue `Network.*` methods call
//! [`ensure_network`] first. All CDP traffic goes through [`cdp`], which
//! maps connection-class failures to `BrowserConnectionLost` and triggers
//! the daemon's shutdown latch.

pub mod console;
pub mod control;
pub mod cookies;
pub mod css;
pub mod input;
pub mod navigate;
pub mod network;
pub mod page;
pub mod ready;

use serde_json::{Value, json};

use super::DaemonState;
use crate::error::DaemonError;

/// Default timeout for wait-style operations (navigate --wait, ready).
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Proactive browser-liveness gate. Returns the active session id.
///
/// # Errors
///
/// `BrowserConnectionLost` (and daemon shutdown) when the CDP client is
/// gone; `NoActiveSession` when no page session is attached.
pub fn require_browser(state: &DaemonState) -> Result<String, DaemonError> {
    if !state.client.is_connected() {
        state.begin_shutdown();
        return Err(DaemonError::BrowserConnectionLost);
    }
    if state.sessions.session_count() == 0 {
        return Err(DaemonError::NoActiveSession);
    }
    state
        .sessions
        .active_id()
        .ok_or(DaemonError::NoActiveSession)
}

/// Send a CDP request on behalf of a handler.
///
/// # Errors
///
/// Maps connection-class CDP errors to `BrowserConnectionLost` and fires
/// the shutdown latch; protocol errors pass through as `Cdp`.
pub async fn cdp(
    state: &DaemonState,
    method: &str,
    params: Option<Value>,
    session_id: Option<&str>,
) -> Result<Value, DaemonError> {
    match state.client.send(method, params, session_id).await {
        Ok(value) => Ok(value),
        Err(e) => {
            let mapped = DaemonError::from(e);
            if matches!(mapped, DaemonError::BrowserConnectionLost) {
                state.begin_shutdown();
            }
            Err(mapped)
        }
    }
}

/// Enable the Network domain on a session, exactly once per session.
///
/// # Errors
///
/// Propagates CDP failures from the enable call.
pub async fn ensure_network(state: &DaemonState, session_id: &str) -> Result<(), DaemonError> {
    for domain in state.sessions.claim_domains(session_id, &["Network"]) {
        let method = format!("{domain}.enable");
        cdp(state, &method, None, Some(session_id)).await?;
    }
    Ok(())
}

/// Resolve a CSS selector to a DOM node id on the session's document.
///
/// # Errors
///
/// `ElementNotFound` when the selector matches nothing.
pub async fn resolve_node(
    state: &DaemonState,
    session_id: &str,
    selector: &str,
) -> Result<i64, DaemonError> {
    let doc = cdp(
        state,
        "DOM.getDocument",
        Some(json!({"depth": 0})),
        Some(session_id),
    )
    .await?;
    let root_id = doc["root"]["nodeId"].as_i64().ok_or_else(|| {
        DaemonError::Internal("DOM.getDocument returned no root node".into())
    })?;

    let node = cdp(
        state,
        "DOM.querySelector",
        Some(json!({"nodeId": root_id, "selector": selector})),
        Some(session_id),
    )
    .await?;
    match node["nodeId"].as_i64() {
        Some(node_id) if node_id != 0 => Ok(node_id),
        _ => Err(DaemonError::ElementNotFound {
            selector: selector.to_owned(),
        }),
    }
}

/// Parse typed params out of the request's JSON payload. An absent payload
/// is treated as an empty object so fully-defaulted commands work bare.
///
/// # Errors
///
/// `InvalidArgument` with the serde error text.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, DaemonError> {
    let source = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(source).map_err(|e| DaemonError::InvalidArgument {
        field: "params".into(),
        reason: e.to_string(),
    })
}
