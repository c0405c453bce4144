//! One-shot IPC client used by CLI verbs.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::DaemonError;
use crate::protocol::{Request, Response};

/// Send one request over the daemon socket and wait for the response line.
///
/// # Errors
///
/// `DaemonNotRunning` when the socket does not exist or refuses the
/// connection; `Internal` for wire-level failures.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Response, DaemonError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|_| DaemonError::DaemonNotRunning)?;

    let mut payload =
        serde_json::to_string(request).map_err(|e| DaemonError::Internal(e.to_string()))?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| DaemonError::Internal(format!("could not write request: {e}")))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| DaemonError::Internal(format!("could not read response: {e}")))?;
    if n == 0 {
        return Err(DaemonError::Internal(
            "daemon closed the connection without a response".into(),
        ));
    }

    serde_json::from_str(line.trim_end())
        .map_err(|e| DaemonError::Internal(format!("unparseable response: {e}")))
}

/// Whether a daemon is answering on the socket.
#[must_use]
pub fn daemon_reachable(socket_path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}
