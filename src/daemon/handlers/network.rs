//! Network buffer reads with lazy response-body fetching.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use super::page::write_output;
use super::{cdp, ensure_network, require_browser};
use crate::daemon::DaemonState;
use crate::daemon::buffers::NetworkEntry;
use crate::error::DaemonError;
use crate::protocol::NetworkParams;
use crate::savepath;

/// Default truncation threshold for fetched response bodies.
const DEFAULT_MAX_BODY_SIZE: usize = 65_536;

pub async fn network(state: &DaemonState, params: NetworkParams) -> Result<Value, DaemonError> {
    params.slice.validate()?;

    // The buffer only fills once Network is enabled, so even a pure read
    // goes through the lazy-enable path first.
    let session_id = require_browser(state)?;
    ensure_network(state, &session_id).await?;

    let entries = state.network.snapshot(&params.filter);
    let mut entries = params.slice.apply(entries);

    if params.body {
        let max_body = params.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE);
        for entry in &mut entries {
            fetch_body(state, entry, max_body).await;
        }
    }

    if params.save {
        let serialized = serde_json::to_string_pretty(&entries)
            .map_err(|e| DaemonError::Internal(e.to_string()))?;
        let path = savepath::resolve(params.path.as_deref(), "network", "network", "json");
        return write_output(&path, serialized.as_bytes());
    }

    let count = entries.len();
    Ok(json!({"entries": entries, "count": count}))
}

/// Fetch one entry's response body via `Network.getResponseBody`.
///
/// Best-effort: bodies are evicted by the browser once a target navigates,
/// so failures leave the entry without a body rather than failing the read.
async fn fetch_body(state: &DaemonState, entry: &mut NetworkEntry, max_body: usize) {
    if entry.response_body.is_some() || entry.session_id.is_empty() {
        return;
    }
    let result = cdp(
        state,
        "Network.getResponseBody",
        Some(json!({"requestId": entry.request_id})),
        Some(&entry.session_id),
    )
    .await;

    let Ok(result) = result else { return };
    let Some(body) = result["body"].as_str() else {
        return;
    };

    let mut text = if result["base64Encoded"].as_bool() == Some(true) {
        match BASE64.decode(body) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => return,
        }
    } else {
        body.to_owned()
    };

    if text.len() > max_body {
        let mut cut = max_body;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        entry.body_truncated = true;
    }
    entry.response_body = Some(text);
}
