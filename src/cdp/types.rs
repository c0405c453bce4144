use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP request (daemon to browser).
#[derive(Debug, Serialize)]
pub struct Request {
    /// Correlation id, unique within one transport lifetime.
    pub id: u64,
    /// CDP method name (e.g. `Page.navigate`).
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Routes the request to one attached target session.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Raw inbound frame before classification.
///
/// Replies carry an `id`, events carry a `method` and no `id`. Everything
/// the browser sends is decoded into this union first.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<ProtocolError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Structured error payload in a CDP reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A reply to a previously sent request.
#[derive(Debug)]
pub struct Reply {
    pub id: u64,
    pub result: Result<Value, ProtocolError>,
}

/// An unsolicited event from the browser.
#[derive(Debug, Clone)]
pub struct Event {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Classification of an inbound frame.
pub enum Inbound {
    Reply(Reply),
    Event(Event),
}

impl Frame {
    /// Classify as reply (has `id`) or event (has `method`).
    ///
    /// Returns `None` for frames that are neither; the reader skips those.
    #[must_use]
    pub fn classify(self) -> Option<Inbound> {
        if let Some(id) = self.id {
            let result = match self.error {
                Some(error) => Err(error),
                None => Ok(self.result.unwrap_or(Value::Null)),
            };
            Some(Inbound::Reply(Reply { id, result }))
        } else if let Some(method) = self.method {
            Some(Inbound::Event(Event {
                method,
                params: self.params.unwrap_or(Value::Null),
                session_id: self.session_id,
            }))
        } else {
            None
        }
    }
}
