//! IPC wire types shared by the daemon and its CLI clients.
//!
//! One JSON object per line in each direction, one request and one response
//! per connection. The `params` payloads are the typed structs below,
//! serialized as plain JSON objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DaemonError;

/// A request from a CLI client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Command name, e.g. `navigate` or `cookies.delete`.
    pub cmd: String,
    /// Command-specific parameters.
    #[serde(default)]
    pub params: Value,
    /// Client is rendering JSON; purely informational for the daemon.
    #[serde(default)]
    pub json: bool,
}

/// A response to a CLI client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response carrying the error's display text.
    #[must_use]
    pub fn failure(err: &DaemonError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
        }
    }
}

// =============================================================================
// Shared slicing and filtering
// =============================================================================

/// Head/tail/range slicing over a snapshot. At most one may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Slice {
    pub head: Option<usize>,
    pub tail: Option<usize>,
    /// Zero-based `[start, end)` entry range.
    pub range: Option<(usize, usize)>,
}

impl Slice {
    /// Reject combinations of head/tail/range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when more than one mode is set.
    pub fn validate(&self) -> Result<(), DaemonError> {
        let set = usize::from(self.head.is_some())
            + usize::from(self.tail.is_some())
            + usize::from(self.range.is_some());
        if set > 1 {
            return Err(DaemonError::InvalidArgument {
                field: "slice".into(),
                reason: "head, tail, and range are mutually exclusive".into(),
            });
        }
        Ok(())
    }

    /// Apply the slice to a snapshot.
    #[must_use]
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        if let Some(n) = self.head {
            return items.into_iter().take(n).collect();
        }
        if let Some(n) = self.tail {
            let skip = items.len().saturating_sub(n);
            return items.into_iter().skip(skip).collect();
        }
        if let Some((start, end)) = self.range {
            return items
                .into_iter()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect();
        }
        items
    }
}

/// Console snapshot filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleFilter {
    /// Message types to keep (log, warn, error, info, debug).
    pub types: Option<Vec<String>>,
    /// Substring match over the message text.
    pub find: Option<String>,
}

/// Network snapshot filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkFilter {
    /// Substring match over the request URL.
    pub find: Option<String>,
    /// CDP resource types to keep (Document, Script, XHR, ...).
    pub types: Option<Vec<String>>,
    /// HTTP methods to keep.
    pub methods: Option<Vec<String>>,
    /// Status spec: exact (`404`), class (`4xx`), or range (`400-499`).
    pub status: Option<String>,
    /// Regular expression matched against the request URL.
    pub url_regex: Option<String>,
    /// Substring match over the response MIME type.
    pub mime: Option<String>,
    /// Keep entries at least this long, in milliseconds.
    pub min_duration_ms: Option<u64>,
    /// Keep entries at least this large, in bytes.
    pub min_size: Option<u64>,
    /// Keep only failed requests.
    pub failed: bool,
}

// =============================================================================
// Command parameters
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadParams {
    pub wait: bool,
    pub timeout_ms: Option<u64>,
}

/// Parameters shared by `back` and `forward`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryParams {
    pub wait: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickParams {
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeParams {
    #[serde(default)]
    pub selector: Option<String>,
    pub text: String,
    /// Key to press after inserting the text (e.g. `Enter`).
    #[serde(default)]
    pub key: Option<String>,
    /// Clear the field first (Ctrl+A, Backspace).
    #[serde(default)]
    pub clear: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusParams {
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectParams {
    pub selector: String,
    pub value: String,
}

/// Exactly one of `selector`, `to`, `by` should be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollParams {
    pub selector: Option<String>,
    pub to: Option<(f64, f64)>,
    pub by: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalParams {
    pub expression: String,
}

/// Line-oriented text search inside rendered HTML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindSpec {
    pub text: String,
    /// Lines of context before each match.
    #[serde(default)]
    pub before: usize,
    /// Lines of context after each match.
    #[serde(default)]
    pub after: usize,
    /// Lines of context on both sides; combined with before/after by max.
    #[serde(default)]
    pub context: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlParams {
    /// Restrict output to elements matching this selector.
    pub select: Option<String>,
    pub find: Option<FindSpec>,
    /// Skip pretty-printing.
    pub raw: bool,
    /// Write to a file instead of returning inline.
    pub save: bool,
    /// Save target; trailing `/` means "directory, auto-name".
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CssAction {
    Dump,
    Save,
    Computed,
    Get,
    Inline,
    Matched,
    Inject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CssParams {
    pub action: CssAction,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleParams {
    pub filter: ConsoleFilter,
    pub slice: Slice,
    pub save: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub filter: NetworkFilter,
    pub slice: Slice,
    /// Fetch response bodies for the returned entries.
    pub body: bool,
    /// Truncation threshold for fetched bodies, in bytes.
    pub max_body_size: Option<usize>,
    pub save: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiesListParams {
    /// Substring match over the cookie name.
    pub find: Option<String>,
    pub save: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieSetParams {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub max_age: Option<i64>,
    #[serde(default)]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieDeleteParams {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotParams {
    pub path: Option<String>,
    pub full_page: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyParams {
    pub selector: Option<String>,
    pub network_idle: bool,
    pub eval: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetParams {
    /// Session id, id prefix, or URL/title substring. `None` lists.
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearParams {
    /// `console`, `network`, or `None` for both.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeParams {
    /// Directory to serve; defaults to the daemon's working directory.
    pub dir: Option<String>,
    /// Proxy upstream URL; overrides static serving.
    pub proxy: Option<String>,
    pub port: Option<u16>,
    pub host: Option<String>,
    /// When non-empty, only changes matching these globs trigger reload.
    pub watch: Vec<String>,
    /// Glob patterns excluded from watching.
    pub ignore: Vec<String>,
}

// =============================================================================
// Status output
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub target_id: String,
    pub url: String,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub running: bool,
    pub pid: u32,
    pub cdp_port: u16,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_url: Option<String>,
    pub sessions: Vec<SessionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let req = Request {
            cmd: "navigate".into(),
            params: json!({"url": "example.com", "wait": true}),
            json: false,
        };
        let line = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back.cmd, "navigate");
        assert_eq!(back.params["url"], "example.com");
    }

    #[test]
    fn response_failure_shape() {
        let resp = Response::failure(&DaemonError::NoActiveSession);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "no active browser session");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn slice_rejects_combinations() {
        let slice = Slice {
            head: Some(5),
            tail: Some(5),
            range: None,
        };
        assert!(slice.validate().is_err());

        let slice = Slice {
            head: Some(5),
            ..Slice::default()
        };
        assert!(slice.validate().is_ok());
    }

    #[test]
    fn slice_head_tail_range() {
        let items: Vec<u32> = (0..10).collect();
        let head = Slice {
            head: Some(3),
            ..Slice::default()
        };
        assert_eq!(head.apply(items.clone()), vec![0, 1, 2]);

        let tail = Slice {
            tail: Some(2),
            ..Slice::default()
        };
        assert_eq!(tail.apply(items.clone()), vec![8, 9]);

        let range = Slice {
            range: Some((4, 7)),
            ..Slice::default()
        };
        assert_eq!(range.apply(items), vec![4, 5, 6]);
    }

    #[test]
    fn slice_tail_larger_than_len() {
        let items: Vec<u32> = vec![1, 2];
        let tail = Slice {
            tail: Some(10),
            ..Slice::default()
        };
        assert_eq!(tail.apply(items), vec![1, 2]);
    }

    #[test]
    fn params_accept_missing_optionals() {
        let params: NavigateParams = serde_json::from_value(json!({"url": "a.b"})).unwrap();
        assert!(!params.wait);
        assert!(params.timeout_ms.is_none());

        let params: ReadyParams = serde_json::from_value(json!({})).unwrap();
        assert!(params.selector.is_none());
        assert!(!params.network_idle);
    }

    #[test]
    fn css_action_wire_names() {
        let params: CssParams =
            serde_json::from_value(json!({"action": "computed", "selector": "body"})).unwrap();
        assert!(matches!(params.action, CssAction::Computed));
    }
}
