//! User input: click, type, key, focus, select, scroll.

use serde_json::{Value, json};

use super::{cdp, require_browser, resolve_node};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::{ClickParams, FocusParams, KeyParams, ScrollParams, SelectParams, TypeParams};

// CDP modifier bitmap.
const MOD_ALT: u64 = 1;
const MOD_CTRL: u64 = 2;
const MOD_META: u64 = 4;
const MOD_SHIFT: u64 = 8;

/// Key metadata for `Input.dispatchKeyEvent`.
struct KeyInfo {
    key: String,
    code: String,
    key_code: u64,
    /// Character produced by the key, for printable keys.
    text: Option<String>,
}

/// Resolve a key name into CDP key event fields.
///
/// Covers the named keys the CLI surface documents plus single printable
/// characters.
fn key_info(name: &str) -> KeyInfo {
    let named = |key: &str, code: &str, key_code: u64, text: Option<&str>| KeyInfo {
        key: key.to_owned(),
        code: code.to_owned(),
        key_code,
        text: text.map(str::to_owned),
    };

    match name {
        "Enter" | "enter" => named("Enter", "Enter", 13, Some("\r")),
        "Tab" | "tab" => named("Tab", "Tab", 9, None),
        "Escape" | "escape" | "Esc" | "esc" => named("Escape", "Escape", 27, None),
        "Backspace" | "backspace" => named("Backspace", "Backspace", 8, None),
        "Delete" | "delete" => named("Delete", "Delete", 46, None),
        "ArrowUp" | "up" => named("ArrowUp", "ArrowUp", 38, None),
        "ArrowDown" | "down" => named("ArrowDown", "ArrowDown", 40, None),
        "ArrowLeft" | "left" => named("ArrowLeft", "ArrowLeft", 37, None),
        "ArrowRight" | "right" => named("ArrowRight", "ArrowRight", 39, None),
        "Home" | "home" => named("Home", "Home", 36, None),
        "End" | "end" => named("End", "End", 35, None),
        "PageUp" | "pageup" => named("PageUp", "PageUp", 33, None),
        "PageDown" | "pagedown" => named("PageDown", "PageDown", 34, None),
        "Space" | "space" | " " => named(" ", "Space", 32, Some(" ")),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => {
                    let upper = c.to_ascii_uppercase();
                    let code = if c.is_ascii_digit() {
                        format!("Digit{upper}")
                    } else {
                        format!("Key{upper}")
                    };
                    KeyInfo {
                        key: c.to_string(),
                        code,
                        key_code: u64::from(upper as u8),
                        text: Some(c.to_string()),
                    }
                }
                _ => named(other, other, 0, None),
            }
        }
    }
}

fn modifier_bitmap(params: &KeyParams) -> u64 {
    let mut bits = 0;
    if params.alt {
        bits |= MOD_ALT;
    }
    if params.ctrl {
        bits |= MOD_CTRL;
    }
    if params.meta {
        bits |= MOD_META;
    }
    if params.shift {
        bits |= MOD_SHIFT;
    }
    bits
}

/// Dispatch keyDown then keyUp for one key.
async fn press_key(
    state: &DaemonState,
    session_id: &str,
    name: &str,
    modifiers: u64,
) -> Result<(), DaemonError> {
    let info = key_info(name);

    let mut down = json!({
        "type": "keyDown",
        "key": info.key,
        "code": info.code,
        "windowsVirtualKeyCode": info.key_code,
        "nativeVirtualKeyCode": info.key_code,
        "modifiers": modifiers,
    });
    // Unmodified printable keys carry text so inputs receive the character.
    if modifiers == 0 {
        if let Some(text) = &info.text {
            down["text"] = json!(text);
        }
    }
    cdp(state, "Input.dispatchKeyEvent", Some(down), Some(session_id)).await?;

    let up = json!({
        "type": "keyUp",
        "key": info.key,
        "code": info.code,
        "windowsVirtualKeyCode": info.key_code,
        "nativeVirtualKeyCode": info.key_code,
        "modifiers": modifiers,
    });
    cdp(state, "Input.dispatchKeyEvent", Some(up), Some(session_id)).await?;
    Ok(())
}

pub async fn click(state: &DaemonState, params: ClickParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let node_id = resolve_node(state, &session_id, &params.selector).await?;

    // A node without a box model is invisible or outside the main frame.
    let box_model = match cdp(
        state,
        "DOM.getBoxModel",
        Some(json!({"nodeId": node_id})),
        Some(&session_id),
    )
    .await
    {
        Ok(value) => value,
        Err(DaemonError::Cdp { .. }) => {
            return Err(DaemonError::NotVisible {
                selector: params.selector,
            });
        }
        Err(other) => return Err(other),
    };

    let Some((x, y)) = quad_centre(&box_model["model"]["content"]) else {
        return Err(DaemonError::NotVisible {
            selector: params.selector,
        });
    };

    for event_type in ["mousePressed", "mouseReleased"] {
        cdp(
            state,
            "Input.dispatchMouseEvent",
            Some(json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": 1,
            })),
            Some(&session_id),
        )
        .await?;
    }

    Ok(json!({"clicked": params.selector, "x": x, "y": y}))
}

/// Centre of a CDP content quad (`[x1,y1,x2,y2,x3,y3,x4,y4]`).
fn quad_centre(quad: &Value) -> Option<(f64, f64)> {
    let values = quad.as_array()?;
    if values.len() != 8 {
        return None;
    }
    let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if nums.len() != 8 {
        return None;
    }
    let x = (nums[0] + nums[2] + nums[4] + nums[6]) / 4.0;
    let y = (nums[1] + nums[3] + nums[5] + nums[7]) / 4.0;
    Some((x, y))
}

pub async fn type_text(state: &DaemonState, params: TypeParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    if let Some(selector) = &params.selector {
        let node_id = resolve_node(state, &session_id, selector).await?;
        cdp(
            state,
            "DOM.focus",
            Some(json!({"nodeId": node_id})),
            Some(&session_id),
        )
        .await?;
    }

    if params.clear {
        press_key(state, &session_id, "a", MOD_CTRL).await?;
        press_key(state, &session_id, "Backspace", 0).await?;
    }

    let typed = params.text.chars().count();

    // One insertText call for the whole string, not per-character events.
    cdp(
        state,
        "Input.insertText",
        Some(json!({"text": params.text})),
        Some(&session_id),
    )
    .await?;

    if let Some(key) = &params.key {
        press_key(state, &session_id, key, 0).await?;
    }

    Ok(json!({"typed": typed}))
}

pub async fn key(state: &DaemonState, params: KeyParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let modifiers = modifier_bitmap(&params);
    press_key(state, &session_id, &params.key, modifiers).await?;
    Ok(json!({"key": params.key, "modifiers": modifiers}))
}

pub async fn focus(state: &DaemonState, params: FocusParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let node_id = resolve_node(state, &session_id, &params.selector).await?;
    cdp(
        state,
        "DOM.focus",
        Some(json!({"nodeId": node_id})),
        Some(&session_id),
    )
    .await?;
    Ok(json!({"focused": params.selector}))
}

pub async fn select(state: &DaemonState, params: SelectParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    // Native selects only: set the value and fire a bubbling change event.
    let selector_json = serde_json::to_string(&params.selector)
        .map_err(|e| DaemonError::Internal(e.to_string()))?;
    let value_json =
        serde_json::to_string(&params.value).map_err(|e| DaemonError::Internal(e.to_string()))?;
    let expression = format!(
        "(() => {{
            const el = document.querySelector({selector_json});
            if (!el) return '__no_element__';
            if (el.tagName !== 'SELECT') return '__not_select__';
            el.value = {value_json};
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return el.value;
        }})()"
    );

    let result = cdp(
        state,
        "Runtime.evaluate",
        Some(json!({"expression": expression, "returnByValue": true})),
        Some(&session_id),
    )
    .await?;

    match result["result"]["value"].as_str() {
        Some("__no_element__") => Err(DaemonError::ElementNotFound {
            selector: params.selector,
        }),
        Some("__not_select__") => Err(DaemonError::InvalidArgument {
            field: "selector".into(),
            reason: format!("{} is not a <select> element", params.selector),
        }),
        Some(value) => Ok(json!({"selected": value})),
        None => Ok(json!({"selected": Value::Null})),
    }
}

pub async fn scroll(state: &DaemonState, params: ScrollParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    let modes = usize::from(params.selector.is_some())
        + usize::from(params.to.is_some())
        + usize::from(params.by.is_some());
    if modes != 1 {
        return Err(DaemonError::InvalidArgument {
            field: "scroll".into(),
            reason: "exactly one of selector, to, by is required".into(),
        });
    }

    // Instant behavior throughout, for determinism.
    let expression = if let Some(selector) = &params.selector {
        let selector_json = serde_json::to_string(selector)
            .map_err(|e| DaemonError::Internal(e.to_string()))?;
        format!(
            "(() => {{
                const el = document.querySelector({selector_json});
                if (!el) return '__no_element__';
                el.scrollIntoView({{ block: 'center', behavior: 'instant' }});
                return 'ok';
            }})()"
        )
    } else if let Some((x, y)) = params.to {
        format!("(() => {{ window.scrollTo({{ left: {x}, top: {y}, behavior: 'instant' }}); return 'ok'; }})()")
    } else {
        let (x, y) = params.by.expect("mode checked above");
        format!("(() => {{ window.scrollBy({{ left: {x}, top: {y}, behavior: 'instant' }}); return 'ok'; }})()")
    };

    let result = cdp(
        state,
        "Runtime.evaluate",
        Some(json!({"expression": expression, "returnByValue": true})),
        Some(&session_id),
    )
    .await?;

    if result["result"]["value"].as_str() == Some("__no_element__") {
        return Err(DaemonError::ElementNotFound {
            selector: params.selector.unwrap_or_default(),
        });
    }
    Ok(json!({"scrolled": true}))
}
