//! Connection wiring beneath [`CdpClient`](super::CdpClient).
//!
//! The socket is split once: a reader task owns the inbound half and is the
//! only place frames are decoded; the outbound half sits behind an async
//! mutex, so concurrent sends serialise into whole frames. Reply pairing
//! happens through a shared wait table instead of a message-passing command
//! loop: callers park a oneshot sender under their request id, the reader
//! resolves it when the matching reply arrives. Timeouts live with the
//! caller, and a guard removes the table entry on every exit path, so a
//! cancelled or timed-out send leaves nothing behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::error::CdpError;
use super::types::{Event, Frame, Inbound, Request};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// What a parked caller eventually receives.
pub(super) type ReplyOutcome = Result<serde_json::Value, CdpError>;

/// Subscription filter that matches every event.
const WILDCARD: &str = "*";

/// Shared state of one browser connection.
///
/// Lock discipline: the wait table and subscriber list are plain mutexes
/// held only for map/list operations, never across I/O. The sink mutex is
/// the async one and is held exactly for the duration of one frame write.
pub(super) struct Wire {
    sink: tokio::sync::Mutex<WsSink>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<ReplyOutcome>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    open: AtomicBool,
    next_id: AtomicU64,
}

struct Subscriber {
    filter: String,
    tx: mpsc::Sender<Event>,
}

impl Wire {
    /// Perform the WebSocket handshake and start the reader task.
    ///
    /// # Errors
    ///
    /// `CdpError::Connection` when the handshake fails,
    /// `CdpError::ConnectionTimeout` when it exceeds `timeout`.
    pub(super) async fn connect(url: &str, timeout: Duration) -> Result<Arc<Self>, CdpError> {
        let handshake = tokio_tungstenite::connect_async(url);
        let ws = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(CdpError::Connection(e.to_string())),
            Err(_) => return Err(CdpError::ConnectionTimeout),
        };
        let (sink, source) = ws.split();

        let wire = Arc::new(Self {
            sink: tokio::sync::Mutex::new(sink),
            waiters: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(read_loop(Arc::clone(&wire), source));
        Ok(wire)
    }

    /// Allocate a request id. Strictly increasing per connection.
    pub(super) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Park a reply slot for a request id, before the request is written.
    ///
    /// The returned ticket unparks the slot when dropped; combined with
    /// caller-side timeouts this keeps the table free of abandoned entries.
    pub(super) fn expect_reply(
        wire: &Arc<Self>,
        id: u64,
    ) -> (oneshot::Receiver<ReplyOutcome>, ReplyTicket) {
        let (tx, rx) = oneshot::channel();
        wire.waiters.lock().expect("wait table").insert(id, tx);
        let ticket = ReplyTicket {
            id,
            wire: Arc::clone(wire),
        };
        (rx, ticket)
    }

    /// Serialise and write one request frame.
    ///
    /// # Errors
    ///
    /// `CdpError::ClientClosed` once the connection is gone (a failed write
    /// also transitions into that state), `CdpError::Internal` when the
    /// request cannot be encoded.
    pub(super) async fn transmit(&self, request: &Request) -> Result<(), CdpError> {
        if !self.is_open() {
            return Err(CdpError::ClientClosed);
        }
        let frame = serde_json::to_string(request)
            .map_err(|e| CdpError::Internal(format!("could not encode request: {e}")))?;

        let mut sink = self.sink.lock().await;
        let written = sink.send(Message::Text(frame.into())).await;
        drop(sink);

        if written.is_err() {
            self.lose();
            return Err(CdpError::ClientClosed);
        }
        Ok(())
    }

    /// Register an event subscription.
    ///
    /// # Errors
    ///
    /// `CdpError::ClientClosed` once the connection is gone.
    pub(super) fn add_subscriber(
        &self,
        filter: &str,
        tx: mpsc::Sender<Event>,
    ) -> Result<(), CdpError> {
        if !self.is_open() {
            return Err(CdpError::ClientClosed);
        }
        self.subscribers
            .lock()
            .expect("subscriber list")
            .push(Subscriber {
                filter: filter.to_owned(),
                tx,
            });
        Ok(())
    }

    /// Decode and act on one inbound text frame.
    fn absorb(&self, text: &str) {
        let Ok(frame) = serde_json::from_str::<Frame>(text) else {
            // One bad frame must not take the connection down.
            trace!("dropping undecodable frame");
            return;
        };
        match frame.classify() {
            Some(Inbound::Reply(reply)) => {
                let slot = self.waiters.lock().expect("wait table").remove(&reply.id);
                if let Some(slot) = slot {
                    let outcome = reply.result.map_err(|e| CdpError::Protocol {
                        code: e.code,
                        message: e.message,
                    });
                    let _ = slot.send(outcome);
                }
            }
            Some(Inbound::Event(event)) => self.fan_out(&event),
            None => {}
        }
    }

    /// Deliver an event to every live subscriber whose filter matches.
    fn fan_out(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock().expect("subscriber list");
        subscribers.retain(|sub| {
            if sub.filter != WILDCARD && sub.filter != event.method {
                return !sub.tx.is_closed();
            }
            // A full channel loses this event for that subscriber; only a
            // dropped receiver unregisters the subscription.
            sub.tx.try_send(event.clone()).is_ok() || !sub.tx.is_closed()
        });
    }

    /// Flip into the closed state and fail everything parked on the wire.
    ///
    /// Safe to call from any task, any number of times; only the first call
    /// does work.
    pub(super) fn lose(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let parked: Vec<_> = {
            let mut table = self.waiters.lock().expect("wait table");
            table.drain().map(|(_, slot)| slot).collect()
        };
        for slot in parked {
            let _ = slot.send(Err(CdpError::ClientClosed));
        }
        // Dropping the senders closes every subscriber channel; that is the
        // signal collector tasks shut down on.
        self.subscribers.lock().expect("subscriber list").clear();
    }

    /// Voluntary close: send the close frame, then fail the parked state.
    pub(super) async fn shutdown(&self) {
        if self.is_open() {
            let _ = self.sink.lock().await.close().await;
        }
        self.lose();
    }
}

/// Unparks a reply slot unless the reader resolved it first.
pub(super) struct ReplyTicket {
    id: u64,
    wire: Arc<Wire>,
}

impl Drop for ReplyTicket {
    fn drop(&mut self) {
        self.wire.waiters.lock().expect("wait table").remove(&self.id);
    }
}

/// Drain inbound frames until the socket dies, then fail the wire.
async fn read_loop(wire: Arc<Wire>, mut source: WsSource) {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => wire.absorb(&text),
            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {
                // Ping/pong/binary carry nothing for CDP.
            }
        }
    }
    debug!("CDP socket gone");
    wire.lose();
}
