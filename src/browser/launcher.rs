use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::BrowserError;
use super::discovery::query_version;

/// First port tried when probing for a free CDP port.
const PORT_PROBE_START: u16 = 9222;
/// Last port tried when probing (inclusive).
const PORT_PROBE_END: u16 = 9321;

/// How often the startup wait re-checks the CDP endpoint.
const READINESS_POLL: Duration = Duration::from_millis(100);

/// Configuration for launching a browser process.
pub struct LaunchConfig {
    /// Path to the browser executable.
    pub executable: PathBuf,
    /// Remote-debugging port (already validated by [`pick_debug_port`]).
    pub port: u16,
    /// Whether to launch headless.
    pub headless: bool,
}

/// A launched browser and the throwaway profile behind it.
///
/// The daemon holds this for its whole lifetime; killing the process
/// (explicitly or on drop) also deletes the profile directory.
pub struct BrowserProcess {
    child: Option<Child>,
    profile_dir: Option<PathBuf>,
    port: u16,
}

impl BrowserProcess {
    /// PID of the browser process.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.as_ref().map_or(0, Child::id)
    }

    /// Terminate the browser and delete its profile directory. Idempotent.
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(dir) = self.profile_dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn port_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Resolve the CDP port to launch on.
///
/// `requested == 0` probes `9222..=9321` and returns the first free port.
/// An explicit port is returned as-is when free.
///
/// # Errors
///
/// Returns `BrowserError::PortInUse` when an explicit port is taken, or
/// `BrowserError::NoFreePort` when the probe range is exhausted.
pub fn pick_debug_port(requested: u16) -> Result<u16, BrowserError> {
    if requested != 0 {
        if port_free(requested) {
            return Ok(requested);
        }
        return Err(BrowserError::PortInUse { port: requested });
    }
    (PORT_PROBE_START..=PORT_PROBE_END)
        .find(|&p| port_free(p))
        .ok_or(BrowserError::NoFreePort)
}

/// Fresh profile directory path: pid, port, launch time, and a counter
/// keep concurrent and rapid-fire launches apart.
fn ephemeral_profile(port: u16) -> PathBuf {
    static LAUNCH_SEQ: AtomicU32 = AtomicU32::new(0);
    let seq = LAUNCH_SEQ.fetch_add(1, Ordering::Relaxed);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    std::env::temp_dir().join(format!(
        "webctl-profile-{}-{port}-{stamp:x}-{seq}",
        std::process::id()
    ))
}

/// Launch a browser process and wait for its CDP endpoint to come up.
///
/// # Errors
///
/// Returns `BrowserError::LaunchFailed` if the process cannot be spawned
/// or exits during startup, or `BrowserError::StartupTimeout` if the
/// endpoint never answers within `timeout`.
pub async fn launch_browser(
    config: LaunchConfig,
    timeout: Duration,
) -> Result<BrowserProcess, BrowserError> {
    let profile_dir = ephemeral_profile(config.port);
    std::fs::create_dir_all(&profile_dir)?;

    let mut command = Command::new(&config.executable);
    command
        .arg(format!("--remote-debugging-port={}", config.port))
        .arg(format!("--user-data-dir={}", profile_dir.display()))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if config.headless {
        command.arg("--headless=new");
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&profile_dir);
            return Err(BrowserError::LaunchFailed(format!(
                "{}: {e}",
                config.executable.display()
            )));
        }
    };

    let mut process = BrowserProcess {
        child: Some(child),
        profile_dir: Some(profile_dir),
        port: config.port,
    };
    await_endpoint(&mut process, timeout).await?;
    Ok(process)
}

/// Wait until `/json/version` answers, the child dies, or time runs out.
async fn await_endpoint(
    process: &mut BrowserProcess,
    timeout: Duration,
) -> Result<(), BrowserError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut tick = tokio::time::interval(READINESS_POLL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        if let Some(child) = process.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(BrowserError::LaunchFailed(format!(
                    "browser exited during startup ({status})"
                )));
            }
        }

        if query_version("127.0.0.1", process.port).await.is_ok() {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            process.kill();
            return Err(BrowserError::StartupTimeout { port: process.port });
        }
    }
}
