//! Unix-socket IPC server.
//!
//! One JSON request line in, one JSON response line out, then the
//! connection closes. Each connection gets its own task; a client that
//! disconnects mid-command cancels the command's work.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::DaemonState;
use super::dispatch;
use crate::error::DaemonError;
use crate::protocol::{Request, Response};

/// Accept connections until the shutdown latch fires.
pub async fn serve(state: Arc<DaemonState>, listener: UnixListener) {
    let mut shutdown_rx = state.shutdown.subscribe();
    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(handle_connection(state, stream));
                    }
                    Err(e) => {
                        warn!(error = %e, "IPC accept failed");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

async fn handle_connection(state: Arc<DaemonState>, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    let response = match serde_json::from_str::<Request>(line.trim_end()) {
        Ok(request) => {
            debug!(cmd = %request.cmd, "dispatching");
            // The client sends nothing after its request line, so the next
            // read completes only when it disconnects. That is the
            // cancellation signal for long-running handlers.
            tokio::select! {
                response = dispatch::dispatch(&state, request) => response,
                () = wait_for_disconnect(&mut reader) => {
                    debug!("client disconnected, command cancelled");
                    return;
                }
            }
        }
        Err(e) => Response::failure(&DaemonError::InvalidArgument {
            field: "request".into(),
            reason: format!("unparseable request line: {e}"),
        }),
    };

    let mut payload = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "could not serialize response");
            return;
        }
    };
    payload.push('\n');
    let _ = write_half.write_all(payload.as_bytes()).await;
    let _ = write_half.shutdown().await;
}

/// Resolves when the peer closes its write side (EOF) or errors out.
async fn wait_for_disconnect<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) {
    let mut scratch = [0u8; 64];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                // Protocol violation (extra data); keep draining so EOF is
                // still observed.
            }
        }
    }
}
