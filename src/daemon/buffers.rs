use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{ConsoleFilter, NetworkFilter};
use crate::savepath::iso8601_from_epoch_ms;

/// Console buffer capacity.
pub const CONSOLE_CAPACITY: usize = 1000;
/// Network buffer capacity.
pub const NETWORK_CAPACITY: usize = 500;

// =============================================================================
// Ring buffer
// =============================================================================

/// Fixed-capacity FIFO that overwrites the oldest entry when full.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    /// Independent copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Mutable access to the newest entry matching `pred`.
    ///
    /// Network entries are enriched in place by later lifecycle events;
    /// scanning from the back finds the live entry first.
    pub fn find_mut_rev<F: Fn(&T) -> bool>(&mut self, pred: F) -> Option<&mut T> {
        self.buf.iter_mut().rev().find(|item| pred(item))
    }
}

// =============================================================================
// Console entries
// =============================================================================

/// One captured console message or uncaught exception.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub ts: String,
    #[serde(rename = "type")]
    pub level: String,
    pub message: String,
    pub args: Value,
    pub url: String,
    pub line_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Value>,
}

/// Map CDP console type names onto the exposed level set.
fn map_console_level(cdp_type: &str) -> String {
    match cdp_type {
        "warning" => "warn".to_owned(),
        "assert" | "error" => "error".to_owned(),
        "log" | "warn" | "info" | "debug" => cdp_type.to_owned(),
        _ => "log".to_owned(),
    }
}

/// Render CDP `RemoteObject` args into one display string.
fn format_console_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| {
            if arg["type"].as_str() == Some("undefined") {
                return "undefined".to_string();
            }
            if let Some(s) = arg["value"].as_str() {
                return s.to_string();
            }
            if let Some(val) = arg.get("value") {
                if !val.is_null() {
                    return serde_json::to_string(val).unwrap_or_default();
                }
            }
            arg["description"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| "null".to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl ConsoleEntry {
    /// Build from `Runtime.consoleAPICalled` params.
    #[must_use]
    pub fn from_console_event(params: &Value) -> Self {
        let level = map_console_level(params["type"].as_str().unwrap_or("log"));
        let args = params["args"].clone();
        let message = params["args"]
            .as_array()
            .map(|a| format_console_args(a))
            .unwrap_or_default();
        let ts = params["timestamp"]
            .as_f64()
            .map(iso8601_from_epoch_ms)
            .unwrap_or_default();

        let first_frame = &params["stackTrace"]["callFrames"][0];
        let url = first_frame["url"].as_str().unwrap_or("").to_owned();
        let line_number = first_frame["lineNumber"].as_u64().unwrap_or(0);
        let stack_trace = params.get("stackTrace").filter(|v| !v.is_null()).cloned();

        Self {
            ts,
            level,
            message,
            args,
            url,
            line_number,
            stack_trace,
        }
    }

    /// Build from `Runtime.exceptionThrown` params; always `error` level.
    #[must_use]
    pub fn from_exception_event(params: &Value) -> Self {
        let details = &params["exceptionDetails"];
        let message = details["exception"]["description"]
            .as_str()
            .or_else(|| details["text"].as_str())
            .unwrap_or("uncaught exception")
            .to_owned();
        let ts = params["timestamp"]
            .as_f64()
            .map(iso8601_from_epoch_ms)
            .unwrap_or_default();

        Self {
            ts,
            level: "error".to_owned(),
            message,
            args: Value::Null,
            url: details["url"].as_str().unwrap_or("").to_owned(),
            line_number: details["lineNumber"].as_u64().unwrap_or(0),
            stack_trace: details.get("stackTrace").filter(|v| !v.is_null()).cloned(),
        }
    }

    fn matches(&self, filter: &ConsoleFilter) -> bool {
        if let Some(types) = &filter.types {
            if !types.iter().any(|t| t == &self.level) {
                return false;
            }
        }
        if let Some(find) = &filter.find {
            if !self.message.contains(find.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Console buffer: ring of entries behind its own lock.
#[derive(Debug)]
pub struct ConsoleBuffer {
    inner: Mutex<RingBuffer<ConsoleEntry>>,
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(CONSOLE_CAPACITY)
    }
}

impl ConsoleBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    pub fn push(&self, entry: ConsoleEntry) {
        self.inner.lock().expect("console lock").push(entry);
    }

    /// Filtered copy of the buffer, oldest first.
    #[must_use]
    pub fn snapshot(&self, filter: &ConsoleFilter) -> Vec<ConsoleEntry> {
        self.inner
            .lock()
            .expect("console lock")
            .snapshot()
            .into_iter()
            .filter(|e| e.matches(filter))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("console lock").clear();
    }
}

// =============================================================================
// Network entries
// =============================================================================

/// One captured network request, assembled from the CDP lifecycle events.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEntry {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub mime_type: String,
    pub start_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub request_headers: Value,
    pub response_headers: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub body_truncated: bool,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,

    /// Session that produced the entry; used for lazy body fetches.
    #[serde(skip)]
    pub session_id: String,
    /// Monotonic CDP timestamp of the request start, for durations.
    #[serde(skip)]
    monotonic_start: f64,
    /// Wall-clock start in epoch milliseconds, for deriving `end_ts`.
    #[serde(skip)]
    wall_start_ms: f64,
}

/// Parse a status spec: exact (`404`), class (`4xx`), range (`400-499`).
///
/// Returns an inclusive `(lo, hi)` bound, or `None` for unparseable specs
/// (which then match nothing).
fn parse_status_spec(spec: &str) -> Option<(i64, i64)> {
    let spec = spec.trim();
    if let Some(class) = spec.strip_suffix("xx") {
        let hundreds: i64 = class.parse().ok()?;
        return Some((hundreds * 100, hundreds * 100 + 99));
    }
    if let Some((lo, hi)) = spec.split_once('-') {
        return Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?));
    }
    let exact: i64 = spec.parse().ok()?;
    Some((exact, exact))
}

impl NetworkEntry {
    fn matches(&self, filter: &NetworkFilter, url_re: Option<&regex::Regex>) -> bool {
        if let Some(find) = &filter.find {
            if !self.url.contains(find.as_str()) {
                return false;
            }
        }
        if filter.url_regex.is_some() {
            // An unparseable pattern matches nothing.
            match url_re {
                Some(re) if re.is_match(&self.url) => {}
                _ => return false,
            }
        }
        if let Some(types) = &filter.types {
            if !types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&self.resource_type))
            {
                return false;
            }
        }
        if let Some(methods) = &filter.methods {
            if !methods.iter().any(|m| m.eq_ignore_ascii_case(&self.method)) {
                return false;
            }
        }
        if let Some(spec) = &filter.status {
            let Some((lo, hi)) = parse_status_spec(spec) else {
                return false;
            };
            let Some(status) = self.status else {
                return false;
            };
            if status < lo || status > hi {
                return false;
            }
        }
        if let Some(mime) = &filter.mime {
            if !self.mime_type.contains(mime.as_str()) {
                return false;
            }
        }
        if let Some(min) = filter.min_duration_ms {
            if self.duration_ms.is_none_or(|d| d < min) {
                return false;
            }
        }
        if let Some(min) = filter.min_size {
            if self.size.is_none_or(|s| s < min) {
                return false;
            }
        }
        if filter.failed && !self.failed {
            return false;
        }
        true
    }
}

/// Network buffer: ring of entries enriched in place by lifecycle events.
#[derive(Debug)]
pub struct NetworkBuffer {
    inner: Mutex<RingBuffer<NetworkEntry>>,
}

impl Default for NetworkBuffer {
    fn default() -> Self {
        Self::new(NETWORK_CAPACITY)
    }
}

impl NetworkBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Materialise a partial entry from `Network.requestWillBeSent`.
    pub fn on_request_will_be_sent(&self, params: &Value, session_id: &str) {
        let request = &params["request"];
        let wall_start_ms = params["wallTime"].as_f64().unwrap_or(0.0) * 1000.0;
        let entry = NetworkEntry {
            request_id: params["requestId"].as_str().unwrap_or("").to_owned(),
            url: request["url"].as_str().unwrap_or("").to_owned(),
            method: request["method"].as_str().unwrap_or("GET").to_owned(),
            status: None,
            resource_type: params["type"].as_str().unwrap_or("Other").to_owned(),
            mime_type: String::new(),
            start_ts: iso8601_from_epoch_ms(wall_start_ms),
            end_ts: None,
            duration_ms: None,
            size: None,
            request_headers: request["headers"].clone(),
            response_headers: Value::Null,
            request_body: request.get("postData").filter(|v| !v.is_null()).cloned(),
            response_body: None,
            body_truncated: false,
            failed: false,
            error_text: None,
            session_id: session_id.to_owned(),
            monotonic_start: params["timestamp"].as_f64().unwrap_or(0.0),
            wall_start_ms,
        };
        self.inner.lock().expect("network lock").push(entry);
    }

    /// Enrich with status/headers/MIME from `Network.responseReceived`.
    pub fn on_response_received(&self, params: &Value) {
        let request_id = params["requestId"].as_str().unwrap_or("");
        let response = &params["response"];
        let mut inner = self.inner.lock().expect("network lock");
        if let Some(entry) = inner.find_mut_rev(|e| e.request_id == request_id) {
            entry.status = response["status"].as_i64();
            entry.mime_type = response["mimeType"].as_str().unwrap_or("").to_owned();
            entry.response_headers = response["headers"].clone();
        }
    }

    /// Finalise on `Network.loadingFinished`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn on_loading_finished(&self, params: &Value) {
        let request_id = params["requestId"].as_str().unwrap_or("");
        let end = params["timestamp"].as_f64().unwrap_or(0.0);
        let size = params["encodedDataLength"].as_f64();
        let mut inner = self.inner.lock().expect("network lock");
        if let Some(entry) = inner.find_mut_rev(|e| e.request_id == request_id) {
            if entry.monotonic_start > 0.0 && end >= entry.monotonic_start {
                let duration_ms = ((end - entry.monotonic_start) * 1000.0) as u64;
                entry.duration_ms = Some(duration_ms);
                if entry.wall_start_ms > 0.0 {
                    entry.end_ts = Some(iso8601_from_epoch_ms(
                        entry.wall_start_ms + duration_ms as f64,
                    ));
                }
            }
            entry.size = size.map(|s| s.max(0.0) as u64);
        }
    }

    /// Finalise on `Network.loadingFailed`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn on_loading_failed(&self, params: &Value) {
        let request_id = params["requestId"].as_str().unwrap_or("");
        let end = params["timestamp"].as_f64().unwrap_or(0.0);
        let mut inner = self.inner.lock().expect("network lock");
        if let Some(entry) = inner.find_mut_rev(|e| e.request_id == request_id) {
            entry.failed = true;
            entry.error_text = params["errorText"].as_str().map(str::to_owned);
            if entry.monotonic_start > 0.0 && end >= entry.monotonic_start {
                entry.duration_ms = Some(((end - entry.monotonic_start) * 1000.0) as u64);
            }
        }
    }

    /// Filtered copy of the buffer, oldest first.
    #[must_use]
    pub fn snapshot(&self, filter: &NetworkFilter) -> Vec<NetworkEntry> {
        let url_re = filter
            .url_regex
            .as_deref()
            .and_then(|pattern| regex::Regex::new(pattern).ok());
        self.inner
            .lock()
            .expect("network lock")
            .snapshot()
            .into_iter()
            .filter(|e| e.matches(filter, url_re.as_ref()))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("network lock").clear();
    }
}
