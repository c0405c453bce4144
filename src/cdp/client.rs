use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::error::CdpError;
use super::transport::Wire;
use super::types::{Event, Request};

/// Configuration for a CDP client connection.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// Timeout for the initial WebSocket connection (default: 10s).
    pub connect_timeout: Duration,
    /// Default timeout for individual CDP requests (default: 30s).
    pub command_timeout: Duration,
    /// Capacity of subscription channels (default: 256).
    pub channel_capacity: usize,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }
}

/// A CDP client multiplexing every target session over one WebSocket.
///
/// `send` routes a request to the browser (or, with a session id, to one
/// attached target) and waits for the correlated reply. `subscribe`
/// registers a channel for unsolicited events. Dropping the future
/// returned by `send` abandons the wait and releases its reply slot.
pub struct CdpClient {
    wire: Arc<Wire>,
    config: CdpConfig,
    url: String,
}

impl CdpClient {
    /// Connect to a browser CDP WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Connection` if the handshake fails, or
    /// `CdpError::ConnectionTimeout` if it exceeds the configured timeout.
    pub async fn connect(url: &str, config: CdpConfig) -> Result<Self, CdpError> {
        let wire = Wire::connect(url, config.connect_timeout).await?;
        Ok(Self {
            wire,
            config,
            url: url.to_owned(),
        })
    }

    /// Send a CDP request and wait for its reply.
    ///
    /// `session_id` of `None` addresses the browser itself (Target.* and
    /// friends); `Some` routes to an attached target session.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::CommandTimeout` when no reply arrives in time,
    /// `CdpError::Protocol` for structured browser errors, and
    /// `CdpError::ClientClosed` once the connection is gone.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, CdpError> {
        self.send_with_timeout(method, params, session_id, self.config.command_timeout)
            .await
    }

    /// Send with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = self.wire.next_id();
        let request = Request {
            id,
            method: method.to_owned(),
            params,
            session_id: session_id.map(str::to_owned),
        };

        // Park the slot before writing so a fast reply cannot slip past;
        // the ticket releases it on timeout, cancellation, or completion.
        let (reply_rx, _ticket) = Wire::expect_reply(&self.wire, id);
        self.wire.transmit(&request).await?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CdpError::ClientClosed),
            Err(_) => Err(CdpError::CommandTimeout {
                method: method.to_owned(),
            }),
        }
    }

    /// Subscribe to events whose method matches `filter` exactly, or every
    /// event when `filter` is `"*"`.
    ///
    /// The receiver closes when the connection is lost or the client shuts
    /// down.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::ClientClosed` once the connection is gone.
    pub async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Event>, CdpError> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.wire.add_subscriber(filter, tx)?;
        Ok(rx)
    }

    /// Close the connection. Idempotent; outstanding waiters resolve with
    /// `ClientClosed`.
    pub async fn close(&self) {
        self.wire.shutdown().await;
    }

    /// Whether the underlying socket is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.wire.is_open()
    }

    /// The WebSocket URL this client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}
