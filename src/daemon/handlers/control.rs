//! Daemon control: status, target, clear, serve, stop.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::info;

use crate::daemon::DaemonState;
use crate::devserver::{self, DevServerConfig};
use crate::error::DaemonError;
use crate::protocol::{ClearParams, ServeParams, StatusInfo, TargetParams};

pub fn status(state: &DaemonState) -> Result<Value, DaemonError> {
    let sessions = state.sessions.list();
    let active_url = sessions
        .iter()
        .find(|s| s.active)
        .map(|s| s.url.clone());

    let info = StatusInfo {
        running: true,
        pid: std::process::id(),
        cdp_port: state.cdp_port,
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_url,
        sessions,
    };
    serde_json::to_value(info).map_err(|e| DaemonError::Internal(e.to_string()))
}

pub fn target(state: &DaemonState, params: TargetParams) -> Result<Value, DaemonError> {
    match params.query {
        None => Ok(json!({"sessions": state.sessions.list()})),
        Some(query) => {
            let info = state.sessions.set_active(&query)?;
            Ok(json!({"switched": info}))
        }
    }
}

pub fn clear(state: &DaemonState, params: ClearParams) -> Result<Value, DaemonError> {
    match params.kind.as_deref() {
        Some("console") => {
            state.console.clear();
            Ok(json!({"cleared": ["console"]}))
        }
        Some("network") => {
            state.network.clear();
            Ok(json!({"cleared": ["network"]}))
        }
        None => {
            state.console.clear();
            state.network.clear();
            Ok(json!({"cleared": ["console", "network"]}))
        }
        Some(other) => Err(DaemonError::InvalidArgument {
            field: "kind".into(),
            reason: format!("unknown buffer kind: {other} (expected console or network)"),
        }),
    }
}

/// Start the dev server; replies once the listener is bound.
pub async fn serve(state: &DaemonState, params: ServeParams) -> Result<Value, DaemonError> {
    let mut slot = state.dev_server.lock().await;
    if slot.is_some() {
        return Err(DaemonError::InvalidArgument {
            field: "serve".into(),
            reason: "dev server is already running".into(),
        });
    }

    let root = params
        .dir
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    if !root.is_dir() {
        return Err(DaemonError::InvalidArgument {
            field: "dir".into(),
            reason: format!("{} is not a directory", root.display()),
        });
    }

    let mode = if params.proxy.is_some() {
        "proxy"
    } else {
        "static"
    };
    let config = DevServerConfig {
        root,
        upstream: params.proxy,
        host: params.host.unwrap_or_else(|| "127.0.0.1".to_owned()),
        port: params.port,
        watch: params.watch,
        ignore: params.ignore,
    };

    let server = devserver::start(config, state.reload_tx.clone())
        .await
        .map_err(|e| match e {
            devserver::DevServerError::Bind(msg) => DaemonError::InvalidArgument {
                field: "port".into(),
                reason: msg,
            },
            devserver::DevServerError::InvalidUpstream(msg) => DaemonError::InvalidArgument {
                field: "proxy".into(),
                reason: msg,
            },
            devserver::DevServerError::Watch(msg) => DaemonError::InvalidArgument {
                field: "watch".into(),
                reason: msg,
            },
        })?;

    let url = server.url.clone();
    *slot = Some(server);
    Ok(json!({"serving": url, "mode": mode}))
}

/// Graceful stop: acknowledge, then fire the latch once the response has
/// had a moment to flush.
pub fn stop(state: &DaemonState) -> Value {
    info!("stop requested over IPC");
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.fire();
    });
    json!({"stopping": true})
}
