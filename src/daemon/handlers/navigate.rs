//! Navigation: navigate, reload, back, forward.

use serde_json::{Value, json};
use tokio::time::Duration;

use super::{DEFAULT_WAIT_TIMEOUT_MS, cdp, require_browser};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::{HistoryParams, NavigateParams, ReloadParams};

/// Hosts that get `http://` instead of `https://` when no scheme is given.
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Prepend a scheme to bare URLs: loopback hosts get `http://`, everything
/// else `https://`. URLs that already carry a scheme pass through.
#[must_use]
pub fn normalize_url(input: &str) -> String {
    if input.contains("://") || input.starts_with("about:") || input.starts_with("data:") {
        return input.to_owned();
    }
    let host = input
        .split('/')
        .next()
        .unwrap_or(input)
        .rsplit_once(':')
        .map_or_else(
            || input.split('/').next().unwrap_or(input),
            |(host, port)| {
                // Only strip a real port suffix; `[::1]` contains colons too.
                if port.chars().all(|c| c.is_ascii_digit()) {
                    host
                } else {
                    input.split('/').next().unwrap_or(input)
                }
            },
        );
    if LOOPBACK_HOSTS.contains(&host) {
        format!("http://{input}")
    } else {
        format!("https://{input}")
    }
}

pub async fn navigate(state: &DaemonState, params: NavigateParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let url = normalize_url(&params.url);
    let timeout_ms = params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);

    // Subscribe before navigating so a fast load is not missed.
    let load_rx = if params.wait {
        Some(
            state
                .client
                .subscribe("Page.loadEventFired")
                .await
                .map_err(DaemonError::from)?,
        )
    } else {
        None
    };

    let result = cdp(
        state,
        "Page.navigate",
        Some(json!({"url": url})),
        Some(&session_id),
    )
    .await?;

    let error_text = result["errorText"].as_str().unwrap_or("");
    if !error_text.is_empty() {
        return Err(DaemonError::NavigationFailed {
            error_text: error_text.to_owned(),
        });
    }

    if let Some(rx) = load_rx {
        wait_for_load(rx, &session_id, timeout_ms).await?;
    }

    Ok(json!({"url": url, "waited": params.wait}))
}

pub async fn reload(state: &DaemonState, params: ReloadParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let timeout_ms = params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);

    let load_rx = if params.wait {
        Some(
            state
                .client
                .subscribe("Page.loadEventFired")
                .await
                .map_err(DaemonError::from)?,
        )
    } else {
        None
    };

    // Reload is always hard.
    cdp(
        state,
        "Page.reload",
        Some(json!({"ignoreCache": true})),
        Some(&session_id),
    )
    .await?;

    if let Some(rx) = load_rx {
        wait_for_load(rx, &session_id, timeout_ms).await?;
    }

    Ok(json!({"reloaded": true, "waited": params.wait}))
}

pub async fn back(state: &DaemonState, params: HistoryParams) -> Result<Value, DaemonError> {
    history_step(state, params, -1).await
}

pub async fn forward(state: &DaemonState, params: HistoryParams) -> Result<Value, DaemonError> {
    history_step(state, params, 1).await
}

async fn history_step(
    state: &DaemonState,
    params: HistoryParams,
    direction: i64,
) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let timeout_ms = params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);

    let history = cdp(state, "Page.getNavigationHistory", None, Some(&session_id)).await?;
    let current_index = history["currentIndex"].as_i64().unwrap_or(0);
    let entries = history["entries"].as_array().ok_or_else(|| {
        DaemonError::Internal("Page.getNavigationHistory returned no entries".into())
    })?;

    let target_index = current_index + direction;
    if target_index < 0 {
        return Err(DaemonError::NoPreviousPage);
    }
    let Some(entry) = usize::try_from(target_index)
        .ok()
        .and_then(|i| entries.get(i))
    else {
        return Err(DaemonError::NoNextPage);
    };
    let entry_id = entry["id"].as_i64().unwrap_or(0);
    let entry_url = entry["url"].as_str().unwrap_or("").to_owned();

    let load_rx = if params.wait {
        Some(
            state
                .client
                .subscribe("Page.loadEventFired")
                .await
                .map_err(DaemonError::from)?,
        )
    } else {
        None
    };

    cdp(
        state,
        "Page.navigateToHistoryEntry",
        Some(json!({"entryId": entry_id})),
        Some(&session_id),
    )
    .await?;

    if let Some(rx) = load_rx {
        wait_for_load(rx, &session_id, timeout_ms).await?;
    }

    Ok(json!({"url": entry_url}))
}

/// Wait for `Page.loadEventFired` on one session.
async fn wait_for_load(
    mut rx: tokio::sync::mpsc::Receiver<crate::cdp::Event>,
    session_id: &str,
    timeout_ms: u64,
) -> Result<(), DaemonError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) if event.session_id.as_deref() == Some(session_id) => {
                        return Ok(());
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
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(
            normalize_url("example.com/path?q=1"),
            "https://example.com/path?q=1"
        );
    }

    #[test]
    fn loopback_hosts_get_http() {
        assert_eq!(normalize_url("localhost"), "http://localhost");
        assert_eq!(normalize_url("localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_url("127.0.0.1:8080/x"), "http://127.0.0.1:8080/x");
        assert_eq!(normalize_url("[::1]:3000"), "http://[::1]:3000");
    }

    #[test]
    fn existing_schemes_pass_through() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("about:blank"), "about:blank");
        assert_eq!(
            normalize_url("data:text/html,<p>x</p>"),
            "data:text/html,<p>x</p>"
        );
    }

    #[test]
    fn port_on_non_loopback_still_https() {
        assert_eq!(normalize_url("example.com:8443"), "https://example.com:8443");
    }
}
