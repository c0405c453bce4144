//! CSS inspection: stylesheet dumps, computed styles, single properties,
//! inline styles, and matched rules.

use serde_json::{Value, json};

use super::page::write_output;
use super::{cdp, require_browser, resolve_node};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::{CssAction, CssParams};
use crate::savepath;

pub async fn css(state: &DaemonState, params: CssParams) -> Result<Value, DaemonError> {
    match params.action {
        CssAction::Dump => dump(state, None).await,
        CssAction::Save => dump(state, Some(params.path)).await,
        CssAction::Computed => computed(state, required_selector(&params)?).await,
        CssAction::Get => {
            let selector = required_selector(&params)?;
            let property = params.property.as_deref().ok_or_else(|| {
                DaemonError::InvalidArgument {
                    field: "property".into(),
                    reason: "css get needs a property name".into(),
                }
            })?;
            get_property(state, selector, property).await
        }
        CssAction::Inline => inline(state, required_selector(&params)?).await,
        CssAction::Matched => matched(state, required_selector(&params)?).await,
        CssAction::Inject => Err(DaemonError::NotImplemented {
            what: "css inject".into(),
            hint: "synthesise a <style> element via eval instead".into(),
        }),
    }
}

fn required_selector(params: &CssParams) -> Result<&str, DaemonError> {
    params
        .selector
        .as_deref()
        .ok_or_else(|| DaemonError::InvalidArgument {
            field: "selector".into(),
            reason: "this css subcommand needs a selector".into(),
        })
}

/// Dump every stylesheet's rules. Cross-origin sheets whose rules the page
/// cannot read are represented by a comment.
async fn dump(state: &DaemonState, save_path: Option<Option<String>>) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    let expression = "(() => {
        const parts = [];
        for (const sheet of document.styleSheets) {
            const href = sheet.href || 'inline <style>';
            try {
                const rules = Array.from(sheet.cssRules).map(r => r.cssText).join('\\n');
                parts.push('/* stylesheet: ' + href + ' */\\n' + rules);
            } catch (e) {
                parts.push('/* stylesheet: ' + href + ' (cross-origin, rules unreadable) */');
            }
        }
        return parts.join('\\n\\n');
    })()";

    let result = evaluate(state, &session_id, expression).await?;
    let content = result.as_str().unwrap_or("").to_owned();

    if let Some(user_path) = save_path {
        let title = state
            .sessions
            .active()
            .map(|s| s.title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "page".to_owned());
        let path = savepath::resolve(user_path.as_deref(), "css", &title, "css");
        return write_output(&path, content.as_bytes());
    }
    Ok(json!({"css": content}))
}

/// All computed properties of the first matching element.
async fn computed(state: &DaemonState, selector: &str) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let selector_json = encode(selector)?;
    let expression = format!(
        "(() => {{
            const el = document.querySelector({selector_json});
            if (!el) return '__no_element__';
            const style = window.getComputedStyle(el);
            const out = {{}};
            for (let i = 0; i < style.length; i++) {{
                const name = style.item(i);
                out[name] = style.getPropertyValue(name);
            }}
            return out;
        }})()"
    );
    let result = evaluate(state, &session_id, &expression).await?;
    reject_missing(&result, selector)?;
    Ok(json!({"computed": result}))
}

/// A single computed property value as a plain scalar.
async fn get_property(
    state: &DaemonState,
    selector: &str,
    property: &str,
) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let selector_json = encode(selector)?;
    let property_json = encode(property)?;
    let expression = format!(
        "(() => {{
            const el = document.querySelector({selector_json});
            if (!el) return '__no_element__';
            return window.getComputedStyle(el).getPropertyValue({property_json});
        }})()"
    );
    let result = evaluate(state, &session_id, &expression).await?;
    reject_missing(&result, selector)?;
    Ok(json!({"value": result}))
}

/// The raw `style` attribute.
async fn inline(state: &DaemonState, selector: &str) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    let selector_json = encode(selector)?;
    let expression = format!(
        "(() => {{
            const el = document.querySelector({selector_json});
            if (!el) return '__no_element__';
            return el.getAttribute('style') || '';
        }})()"
    );
    let result = evaluate(state, &session_id, &expression).await?;
    reject_missing(&result, selector)?;
    Ok(json!({"style": result}))
}

/// Matched rules via the CSS domain, reduced to selector and text.
async fn matched(state: &DaemonState, selector: &str) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;

    // CSS.getMatchedStylesForNode needs the CSS domain on top of DOM.
    for domain in state.sessions.claim_domains(&session_id, &["CSS"]) {
        let method = format!("{domain}.enable");
        cdp(state, &method, None, Some(&session_id)).await?;
    }

    let node_id = resolve_node(state, &session_id, selector).await?;
    let result = cdp(
        state,
        "CSS.getMatchedStylesForNode",
        Some(json!({"nodeId": node_id})),
        Some(&session_id),
    )
    .await?;

    let rules: Vec<Value> = result["matchedCSSRules"]
        .as_array()
        .map(|matches| {
            matches
                .iter()
                .map(|m| {
                    let rule = &m["rule"];
                    json!({
                        "selector": rule["selectorList"]["text"],
                        "origin": rule["origin"],
                        "cssText": rule["style"]["cssText"],
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(json!({"matched": rules}))
}

async fn evaluate(
    state: &DaemonState,
    session_id: &str,
    expression: &str,
) -> Result<Value, DaemonError> {
    let result = cdp(
        state,
        "Runtime.evaluate",
        Some(json!({"expression": expression, "returnByValue": true})),
        Some(session_id),
    )
    .await?;
    Ok(result["result"]["value"].clone())
}

fn reject_missing(result: &Value, selector: &str) -> Result<(), DaemonError> {
    if result.as_str() == Some("__no_element__") {
        return Err(DaemonError::ElementNotFound {
            selector: selector.to_owned(),
        });
    }
    Ok(())
}

fn encode(s: &str) -> Result<String, DaemonError> {
    serde_json::to_string(s).map_err(|e| DaemonError::Internal(e.to_string()))
}
