//! Page inspection: eval, html, find, screenshot.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use super::{cdp, require_browser};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::{EvalParams, FindSpec, HtmlParams, ScreenshotParams};
use crate::savepath;

pub async fn eval(state: &DaemonState, params: EvalParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let result = cdp(
        state,
        "Runtime.evaluate",
        Some(json!({
            "expression": params.expression,
            "returnByValue": true,
            "awaitPromise": true,
        })),
        Some(&session_id),
    )
    .await?;

    if let Some(details) = result.get("exceptionDetails") {
        let text = details["exception"]["description"]
            .as_str()
            .or_else(|| details["text"].as_str())
            .unwrap_or("evaluation failed");
        return Err(DaemonError::Cdp {
            code: 0,
            message: text.to_owned(),
        });
    }

    Ok(json!({"value": evaluation_value(&result["result"])}))
}

/// Turn a CDP `RemoteObject` into a plain JSON value; `undefined` and
/// functions become their string representations.
fn evaluation_value(remote: &Value) -> Value {
    match remote["type"].as_str() {
        Some("undefined") => Value::String("undefined".into()),
        Some("function") => Value::String(
            remote["description"]
                .as_str()
                .unwrap_or("function")
                .to_owned(),
        ),
        _ => {
            if let Some(value) = remote.get("value") {
                value.clone()
            } else if let Some(desc) = remote["description"].as_str() {
                Value::String(desc.to_owned())
            } else {
                Value::Null
            }
        }
    }
}

pub async fn html(state: &DaemonState, params: HtmlParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    let mut content = if let Some(selector) = &params.select {
        selected_html(state, &session_id, selector).await?
    } else {
        full_html(state, &session_id).await?
    };

    if !params.raw {
        content = pretty_html(&content);
    }

    if let Some(find) = &params.find {
        content = filter_lines(&content, find);
    }

    if params.save {
        let title = active_title(state);
        let path = savepath::resolve(params.path.as_deref(), "html", &title, "html");
        return write_output(&path, content.as_bytes());
    }

    Ok(json!({"html": content}))
}

/// Shorthand for `html --find`, kept as its own verb.
pub async fn find(state: &DaemonState, spec: FindSpec) -> Result<Value, DaemonError> {
    let params = HtmlParams {
        find: Some(spec),
        ..HtmlParams::default()
    };
    html(state, params).await
}

async fn full_html(state: &DaemonState, session_id: &str) -> Result<String, DaemonError> {
    let doc = cdp(
        state,
        "DOM.getDocument",
        Some(json!({"depth": 0})),
        Some(session_id),
    )
    .await?;
    let root_id = doc["root"]["nodeId"].as_i64().ok_or_else(|| {
        DaemonError::Internal("DOM.getDocument returned no root node".into())
    })?;
    let outer = cdp(
        state,
        "DOM.getOuterHTML",
        Some(json!({"nodeId": root_id})),
        Some(session_id),
    )
    .await?;
    Ok(outer["outerHTML"].as_str().unwrap_or("").to_owned())
}

/// Outer HTML of every match, joined with an HTML-comment separator.
async fn selected_html(
    state: &DaemonState,
    session_id: &str,
    selector: &str,
) -> Result<String, DaemonError> {
    let doc = cdp(
        state,
        "DOM.getDocument",
        Some(json!({"depth": 0})),
        Some(session_id),
    )
    .await?;
    let root_id = doc["root"]["nodeId"].as_i64().ok_or_else(|| {
        DaemonError::Internal("DOM.getDocument returned no root node".into())
    })?;

    let found = cdp(
        state,
        "DOM.querySelectorAll",
        Some(json!({"nodeId": root_id, "selector": selector})),
        Some(session_id),
    )
    .await?;
    let node_ids: Vec<i64> = found["nodeIds"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    if node_ids.is_empty() {
        return Err(DaemonError::ElementNotFound {
            selector: selector.to_owned(),
        });
    }

    let total = node_ids.len();
    let mut parts = Vec::with_capacity(total);
    for (index, node_id) in node_ids.into_iter().enumerate() {
        let outer = cdp(
            state,
            "DOM.getOuterHTML",
            Some(json!({"nodeId": node_id})),
            Some(session_id),
        )
        .await?;
        parts.push(format!(
            "<!-- Element {} of {}: {} -->\n{}",
            index + 1,
            total,
            selector,
            outer["outerHTML"].as_str().unwrap_or("")
        ));
    }
    Ok(parts.join("\n"))
}

/// Minimal readability pass: break between adjacent tags.
#[must_use]
pub fn pretty_html(html: &str) -> String {
    html.replace("><", ">\n<")
}

/// grep-style line filter: keep matching lines with before/after context,
/// merging overlapping windows. Window separators are `--` lines.
#[must_use]
pub fn filter_lines(content: &str, spec: &FindSpec) -> String {
    let before = spec.before.max(spec.context);
    let after = spec.after.max(spec.context);
    let lines: Vec<&str> = content.lines().collect();

    let matches: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(spec.text.as_str()))
        .map(|(i, _)| i)
        .collect();

    if matches.is_empty() {
        return String::new();
    }

    // Build [start, end] windows and merge overlapping/adjacent ones.
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for &m in &matches {
        let start = m.saturating_sub(before);
        let end = (m + after).min(lines.len().saturating_sub(1));
        match windows.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => {
                *last_end = (*last_end).max(end);
            }
            _ => windows.push((start, end)),
        }
    }

    windows
        .iter()
        .map(|&(start, end)| lines[start..=end].join("\n"))
        .collect::<Vec<_>>()
        .join("\n--\n")
}

pub async fn screenshot(
    state: &DaemonState,
    params: ScreenshotParams,
) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    let mut capture_params = json!({"format": "png"});
    if params.full_page {
        capture_params["captureBeyondViewport"] = json!(true);
    }

    let result = cdp(
        state,
        "Page.captureScreenshot",
        Some(capture_params),
        Some(&session_id),
    )
    .await?;

    let encoded = result["data"].as_str().ok_or_else(|| {
        DaemonError::Internal("Page.captureScreenshot returned no data".into())
    })?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| DaemonError::Internal(format!("invalid screenshot base64: {e}")))?;

    let title = active_title(state);
    let path = savepath::resolve(params.path.as_deref(), "screenshot", &title, "png");
    write_output(&path, &bytes)
}

/// Title of the active session for auto-named files.
fn active_title(state: &DaemonState) -> String {
    state
        .sessions
        .active()
        .map(|s| s.title)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "page".to_owned())
}

/// Write bytes to a save target, creating parent directories.
pub fn write_output(path: &std::path::Path, bytes: &[u8]) -> Result<Value, DaemonError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DaemonError::Save(e.to_string()))?;
    }
    std::fs::write(path, bytes).map_err(|e| DaemonError::Save(e.to_string()))?;
    Ok(json!({"saved": path.display().to_string(), "bytes": bytes.len()}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_value_variants() {
        assert_eq!(
            evaluation_value(&json!({"type": "number", "value": 42})),
            json!(42)
        );
        assert_eq!(
            evaluation_value(&json!({"type": "string", "value": "hi"})),
            json!("hi")
        );
        assert_eq!(
            evaluation_value(&json!({"type": "undefined"})),
            json!("undefined")
        );
        assert_eq!(
            evaluation_value(&json!({"type": "function", "description": "function f() {}"})),
            json!("function f() {}")
        );
        assert_eq!(
            evaluation_value(&json!({"type": "object", "value": {"a": 1}})),
            json!({"a": 1})
        );
    }

    #[test]
    fn pretty_breaks_adjacent_tags() {
        assert_eq!(
            pretty_html("<div><p>x</p></div>"),
            "<div>\n<p>x</p>\n</div>"
        );
    }

    fn spec(text: &str, before: usize, after: usize, context: usize) -> FindSpec {
        FindSpec {
            text: text.into(),
            before,
            after,
            context,
        }
    }

    #[test]
    fn filter_lines_basic_match() {
        let content = "one\ntwo\nthree\nfour";
        assert_eq!(filter_lines(content, &spec("three", 0, 0, 0)), "three");
    }

    #[test]
    fn filter_lines_with_context() {
        let content = "a\nb\nMATCH\nc\nd";
        assert_eq!(
            filter_lines(content, &spec("MATCH", 1, 1, 0)),
            "b\nMATCH\nc"
        );
        assert_eq!(
            filter_lines(content, &spec("MATCH", 0, 0, 2)),
            "a\nb\nMATCH\nc\nd"
        );
    }

    #[test]
    fn filter_lines_merges_overlapping_windows() {
        let content = "x\nMATCH\ny\nMATCH\nz";
        // Windows [0,2] and [2,4] overlap into one block.
        assert_eq!(
            filter_lines(content, &spec("MATCH", 1, 1, 0)),
            "x\nMATCH\ny\nMATCH\nz"
        );
    }

    #[test]
    fn filter_lines_separates_distant_windows() {
        let content = "MATCH\na\nb\nc\nd\ne\nMATCH";
        assert_eq!(
            filter_lines(content, &spec("MATCH", 0, 0, 0)),
            "MATCH\n--\nMATCH"
        );
    }

    #[test]
    fn filter_lines_no_match_is_empty() {
        assert_eq!(filter_lines("a\nb", &spec("zzz", 2, 2, 0)), "");
    }

    #[test]
    fn write_output_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deep/out.txt");
        let result = write_output(&target, b"hello").unwrap();
        assert_eq!(result["bytes"], 5);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }
}
