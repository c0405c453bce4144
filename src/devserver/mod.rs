//! Development HTTP server with file-watch-driven hot reload.
//!
//! Static mode serves a directory with caching disabled; proxy mode
//! forwards to an upstream URL. Either way a recursive watcher on the root
//! directory reports settled change bursts through `on_change`, and the
//! daemon answers them with a hard `Page.reload` on the active session.

mod watcher;

use std::fmt;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use watcher::{WatchHandle, build_ignore_set, is_ignored, spawn_watcher};

/// Ports tried in order when none is requested, before falling back to an
/// OS-assigned one.
const CANDIDATE_PORTS: [u16; 5] = [3000, 8080, 8000, 5000, 4000];

/// Index files tried for directory requests, in order.
const INDEX_CANDIDATES: [&str; 4] = ["index.html", "index.htm", "default.html", "home.html"];

#[derive(Debug)]
pub enum DevServerError {
    Bind(String),
    InvalidUpstream(String),
    Watch(String),
}

impl fmt::Display for DevServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "dev server bind failed: {msg}"),
            Self::InvalidUpstream(msg) => write!(f, "invalid proxy upstream: {msg}"),
            Self::Watch(msg) => write!(f, "file watcher failed: {msg}"),
        }
    }
}

impl std::error::Error for DevServerError {}

/// Dev server configuration as resolved from the `serve` command.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory served (static mode) and watched (both modes).
    pub root: PathBuf,
    /// Upstream URL; switches the server into proxy mode.
    pub upstream: Option<String>,
    pub host: String,
    /// Explicit port; `None` walks the candidate list.
    pub port: Option<u16>,
    /// When non-empty, only changes matching these globs trigger reload.
    pub watch: Vec<String>,
    /// Glob patterns excluded from watching.
    pub ignore: Vec<String>,
}

enum ServeMode {
    Static { root: PathBuf },
    Proxy { upstream: url::Url, client: reqwest::Client },
}

struct ServeState {
    mode: ServeMode,
}

/// A running dev server. Dropping the handle stops serving and watching.
pub struct DevServer {
    pub addr: SocketAddr,
    pub url: String,
    server_task: tokio::task::JoinHandle<()>,
    _watch: WatchHandle,
}

impl DevServer {
    pub fn shutdown(&self) {
        self.server_task.abort();
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

/// Bind the listener, start serving, and start the watcher.
///
/// Returns once the socket is listening; `serve` replies to the client at
/// that point.
///
/// # Errors
///
/// Returns `DevServerError` for bind failures, an unparseable upstream
/// URL, or watcher registration failure.
pub async fn start(
    config: DevServerConfig,
    on_change: mpsc::Sender<()>,
) -> Result<DevServer, DevServerError> {
    let mode = match &config.upstream {
        Some(upstream) => {
            let parsed = url::Url::parse(upstream)
                .map_err(|e| DevServerError::InvalidUpstream(format!("{upstream}: {e}")))?;
            ServeMode::Proxy {
                upstream: parsed,
                client: reqwest::Client::new(),
            }
        }
        None => ServeMode::Static {
            root: config.root.clone(),
        },
    };

    let listener = bind_listener(&config.host, config.port).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| DevServerError::Bind(e.to_string()))?;

    let state = Arc::new(ServeState { mode });
    let router: Router = Router::new().fallback(handle).with_state(state);

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            debug!(error = %e, "dev server exited");
        }
    });

    let watch = match spawn_watcher(config.root.clone(), &config.watch, &config.ignore, on_change)
    {
        Ok(watch) => watch,
        Err(e) => {
            // Don't leak a listening server when the watcher cannot start.
            server_task.abort();
            return Err(DevServerError::Watch(e));
        }
    };

    let url = format!("http://{addr}");
    info!(%url, root = %config.root.display(), "dev server listening");

    Ok(DevServer {
        addr,
        url,
        server_task,
        _watch: watch,
    })
}

async fn bind_listener(host: &str, port: Option<u16>) -> Result<TcpListener, DevServerError> {
    if let Some(port) = port {
        return TcpListener::bind((host, port))
            .await
            .map_err(|e| DevServerError::Bind(format!("{host}:{port}: {e}")));
    }

    for candidate in CANDIDATE_PORTS {
        if let Ok(listener) = TcpListener::bind((host, candidate)).await {
            return Ok(listener);
        }
    }

    TcpListener::bind((host, 0))
        .await
        .map_err(|e| DevServerError::Bind(format!("{host}:0: {e}")))
}

async fn handle(State(state): State<Arc<ServeState>>, req: Request) -> Response {
    match &state.mode {
        ServeMode::Static { root } => serve_static(root, req.uri().path()).await,
        ServeMode::Proxy { upstream, client } => proxy(upstream, client, req).await,
    }
}

// =============================================================================
// Static mode
// =============================================================================

/// Map a request path onto a file under `root`.
///
/// Percent-decodes, then rejects any path whose cleaned form would escape
/// the root (`..` components).
fn sanitize_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path.trim_start_matches('/'));
    let relative = Path::new(&decoded);

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            // ParentDir, RootDir, Prefix: treat as an escape attempt
            _ => return None,
        }
    }
    Some(root.join(clean))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                #[allow(clippy::cast_possible_truncation)]
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        "wasm" => "application/wasm",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn plain_response(status: StatusCode, body: &str) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .header("cache-control", "no-store")
        .body(Body::from(body.to_owned()))
        .unwrap_or_default()
}

async fn serve_static(root: &Path, request_path: &str) -> Response {
    let Some(mut file_path) = sanitize_path(root, request_path) else {
        return plain_response(StatusCode::FORBIDDEN, "forbidden");
    };

    if tokio::fs::metadata(&file_path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        let mut found = None;
        for candidate in INDEX_CANDIDATES {
            let index = file_path.join(candidate);
            if tokio::fs::metadata(&index)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                found = Some(index);
                break;
            }
        }
        match found {
            Some(index) => file_path = index,
            None => return plain_response(StatusCode::NOT_FOUND, "no index file"),
        }
    }

    match tokio::fs::read(&file_path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", content_type_for(&file_path))
            .header("cache-control", "no-store")
            .body(Body::from(bytes))
            .unwrap_or_default(),
        Err(_) => plain_response(StatusCode::NOT_FOUND, "not found"),
    }
}

// =============================================================================
// Proxy mode
// =============================================================================

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

async fn proxy(upstream: &url::Url, client: &reqwest::Client, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_owned();

    let mut target = upstream.clone();
    target.set_path(path_and_query.split('?').next().unwrap_or("/"));
    target.set_query(path_and_query.split_once('?').map(|(_, q)| q));

    let method = match reqwest::Method::from_bytes(req.method().as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return plain_response(StatusCode::BAD_REQUEST, "bad method"),
    };

    let original_host = req
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    // Collect forwardable headers before consuming the request body.
    let forward_headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()) && name.as_str() != "host")
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return plain_response(StatusCode::BAD_REQUEST, "unreadable body"),
    };

    let mut builder = client.request(method, target);
    for (name, value) in forward_headers {
        builder = builder.header(name, value);
    }
    builder = builder.header("x-forwarded-host", original_host);
    builder = builder.body(body.to_vec());

    let upstream_response = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            return plain_response(StatusCode::BAD_GATEWAY, &format!("upstream error: {e}"));
        }
    };

    let status =
        StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_builder = response_builder.header(name, value);
        }
    }

    match upstream_response.bytes().await {
        Ok(bytes) => response_builder
            .body(Body::from(bytes))
            .unwrap_or_default(),
        Err(e) => plain_response(StatusCode::BAD_GATEWAY, &format!("upstream body error: {e}")),
    }
}
