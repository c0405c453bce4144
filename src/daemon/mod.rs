//! The long-lived daemon: owns the CDP client, session manager, event
//! buffers, IPC listener, and the optional dev server.
//!
//! Connection loss is terminal. The shutdown latch fires exactly once, and
//! the cleanup order is fixed: clear sessions, close the CDP client (which
//! fails outstanding waiters), stop the IPC listener, kill the browser we
//! launched, then remove socket and pidfiles.

pub mod buffers;
pub mod collectors;
pub mod dispatch;
pub mod handlers;
pub mod ipc;
pub mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

use crate::browser::{self, LaunchConfig};
use crate::cdp::{CdpClient, CdpConfig};
use crate::config::DaemonConfig;
use crate::devserver::DevServer;
use crate::error::DaemonError;
use self::buffers::{ConsoleBuffer, NetworkBuffer};
use self::session::SessionManager;

/// How long startup waits for the first page session to attach.
const FIRST_SESSION_WAIT: Duration = Duration::from_secs(5);

/// Single-fire shutdown signal, safe to trigger from any task.
#[derive(Debug, Clone)]
pub struct ShutdownLatch {
    fired: Arc<AtomicBool>,
    tx: watch::Sender<bool>,
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownLatch {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Fire the latch. Only the first call has any effect.
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(true);
        }
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Everything command handlers need, shared behind an `Arc`.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub client: Arc<CdpClient>,
    pub sessions: Arc<SessionManager>,
    pub console: Arc<ConsoleBuffer>,
    pub network: Arc<NetworkBuffer>,
    pub shutdown: ShutdownLatch,
    pub started_at: Instant,
    pub browser_pid: u32,
    pub cdp_port: u16,
    pub dev_server: Mutex<Option<DevServer>>,
    pub reload_tx: mpsc::Sender<()>,
}

impl DaemonState {
    /// Clear state and fire the shutdown latch; used on connection loss and
    /// internal invariant failures.
    pub fn begin_shutdown(&self) {
        self.sessions.clear();
        self.shutdown.fire();
    }
}

/// Run the daemon until shutdown. Blocks the calling task.
///
/// # Errors
///
/// Returns `DaemonError` if another daemon is already running, the browser
/// cannot be launched, or the CDP/IPC endpoints cannot be set up.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    preflight(&config)?;

    if let Some(dir) = config.socket_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DaemonError::Launch(e.to_string()))?;
    }

    // Launch the browser.
    let port = browser::pick_debug_port(config.cdp_port)?;
    let executable = match &config.browser_path {
        Some(path) => path.clone(),
        None => browser::find_browser_executable()?,
    };
    // The process handle stays owned here for the daemon's lifetime, so a
    // graceful shutdown also takes the browser down.
    let mut process = browser::launch_browser(
        LaunchConfig {
            executable,
            port,
            headless: config.headless,
        },
        Duration::from_secs(30),
    )
    .await?;

    let version = browser::query_version("127.0.0.1", port).await?;
    info!(browser = %version.browser, port, "browser ready");

    let browser_pid = process.pid();

    let client = Arc::new(
        CdpClient::connect(&version.ws_debugger_url, CdpConfig::default())
            .await
            .map_err(DaemonError::from)?,
    );

    let sessions = Arc::new(SessionManager::new());
    let console = Arc::new(ConsoleBuffer::default());
    let network = Arc::new(NetworkBuffer::default());

    // Collectors subscribe before target discovery is switched on, so the
    // replayed targetCreated events for existing pages are not missed. The
    // target collector is the only attach path.
    collectors::spawn_console_collector(&client, Arc::clone(&console))
        .await
        .map_err(DaemonError::from)?;
    collectors::spawn_network_collector(&client, Arc::clone(&network), Arc::clone(&sessions))
        .await
        .map_err(DaemonError::from)?;
    collectors::spawn_target_collector(Arc::clone(&client), Arc::clone(&sessions))
        .await
        .map_err(DaemonError::from)?;

    client
        .send(
            "Target.setDiscoverTargets",
            Some(json!({"discover": true})),
            None,
        )
        .await
        .map_err(DaemonError::from)?;

    // Wait for the first page session; a browser with no page is unusual
    // but not fatal.
    let wait_start = Instant::now();
    while sessions.session_count() == 0 && wait_start.elapsed() < FIRST_SESSION_WAIT {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if sessions.session_count() == 0 {
        warn!("no page target attached after startup wait");
    }

    // Pidfiles, then the socket: the socket's existence is the liveness
    // signal clients look for.
    write_pidfile(&config.pidfile_path, std::process::id())?;
    write_pidfile(&config.browser_pidfile_path, browser_pid)?;

    let listener = tokio::net::UnixListener::bind(&config.socket_path)
        .map_err(|e| DaemonError::Launch(format!("could not bind IPC socket: {e}")))?;

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);

    let state = Arc::new(DaemonState {
        config: config.clone(),
        client: Arc::clone(&client),
        sessions: Arc::clone(&sessions),
        console,
        network,
        shutdown: ShutdownLatch::new(),
        started_at: Instant::now(),
        browser_pid,
        cdp_port: port,
        dev_server: Mutex::new(None),
        reload_tx,
    });

    // Hot reload: settled file-change bursts become hard reloads on the
    // active session.
    {
        let reload_client = Arc::clone(&client);
        let reload_sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            while reload_rx.recv().await.is_some() {
                if let Some(session_id) = reload_sessions.active_id() {
                    let params = json!({"ignoreCache": true});
                    if let Err(e) = reload_client
                        .send("Page.reload", Some(params), Some(&session_id))
                        .await
                    {
                        warn!(error = %e, "hot reload failed");
                    }
                }
            }
        });
    }

    // Signals fire the same latch as `stop` and connection loss.
    spawn_signal_handler(&state);

    info!(socket = %config.socket_path.display(), "daemon listening");
    ipc::serve(Arc::clone(&state), listener).await;

    // Shutdown sequence. Order matters; every step is idempotent.
    info!("daemon shutting down");
    sessions.clear();
    client.close().await;
    {
        let mut dev_server = state.dev_server.lock().await;
        if let Some(server) = dev_server.take() {
            server.shutdown();
        }
    }
    // Give in-flight response writes a moment to complete.
    tokio::time::sleep(Duration::from_millis(200)).await;
    process.kill();
    let _ = std::fs::remove_file(&config.socket_path);
    let _ = std::fs::remove_file(&config.pidfile_path);
    let _ = std::fs::remove_file(&config.browser_pidfile_path);

    Ok(())
}

/// Refuse to start when another daemon appears to be running; clean up
/// stale leftovers otherwise.
fn preflight(config: &DaemonConfig) -> Result<(), DaemonError> {
    if config.socket_path.exists() {
        if std::os::unix::net::UnixStream::connect(&config.socket_path).is_ok() {
            return Err(DaemonError::AlreadyRunning(format!(
                "socket {} is live",
                config.socket_path.display()
            )));
        }
        // Stale socket from an unclean exit.
        let _ = std::fs::remove_file(&config.socket_path);
    }

    if let Ok(contents) = std::fs::read_to_string(&config.pidfile_path) {
        if let Ok(pid) = contents.trim().parse::<i32>() {
            if process_alive(pid) {
                return Err(DaemonError::AlreadyRunning(format!(
                    "pidfile {} points at live process {pid}",
                    config.pidfile_path.display()
                )));
            }
        }
        let _ = std::fs::remove_file(&config.pidfile_path);
    }

    Ok(())
}

fn process_alive(pid: i32) -> bool {
    // Signal 0 checks existence without sending anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Write a pidfile atomically: temp file in the same directory, then rename.
fn write_pidfile(path: &std::path::Path, pid: u32) -> Result<(), DaemonError> {
    let tmp = path.with_extension("pid.tmp");
    std::fs::write(&tmp, format!("{pid}\n"))
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| DaemonError::Launch(format!("could not write pidfile: {e}")))
}

fn spawn_signal_handler(state: &Arc<DaemonState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            error!("could not install SIGTERM handler");
            return;
        };
        let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
            error!("could not install SIGINT handler");
            return;
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        state.begin_shutdown();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_fires_once() {
        let latch = ShutdownLatch::new();
        let mut rx = latch.subscribe();
        assert!(!latch.is_fired());

        latch.fire();
        latch.fire();
        latch.fire();

        assert!(latch.is_fired());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn latch_wakes_subscribers() {
        let latch = ShutdownLatch::new();
        let mut rx = latch.subscribe();

        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
        });

        latch.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("subscriber woken")
            .unwrap();
    }

    #[test]
    fn concurrent_fire_is_safe() {
        let latch = ShutdownLatch::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.fire())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(latch.is_fired());
    }
}
