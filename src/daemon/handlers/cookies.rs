//! Cookie operations. There is no cookie buffer: CDP does not surface
//! cookie mutations reliably, so every read asks the browser live.

use serde_json::{Value, json};

use super::page::write_output;
use super::{cdp, ensure_network, require_browser};
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::{CookieDeleteParams, CookieSetParams, CookiesListParams};
use crate::savepath;

pub async fn list(state: &DaemonState, params: CookiesListParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    ensure_network(state, &session_id).await?;

    let result = cdp(state, "Network.getCookies", None, Some(&session_id)).await?;
    let mut cookies: Vec<Value> = result["cookies"].as_array().cloned().unwrap_or_default();

    if let Some(find) = &params.find {
        cookies.retain(|c| c["name"].as_str().is_some_and(|n| n.contains(find.as_str())));
    }

    if params.save {
        let serialized = serde_json::to_string_pretty(&cookies)
            .map_err(|e| DaemonError::Internal(e.to_string()))?;
        let path = savepath::resolve(params.path.as_deref(), "cookies", "cookies", "json");
        return write_output(&path, serialized.as_bytes());
    }

    let count = cookies.len();
    Ok(json!({"cookies": cookies, "count": count}))
}

pub async fn set(state: &DaemonState, params: CookieSetParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    ensure_network(state, &session_id).await?;

    let mut cookie = json!({
        "name": params.name.clone(),
        "value": params.value,
        "path": params.path.clone().unwrap_or_else(|| "/".to_owned()),
        "secure": params.secure,
        "httpOnly": params.http_only,
    });

    if let Some(domain) = &params.domain {
        cookie["domain"] = json!(domain);
    } else {
        // Without a domain, anchor the cookie to the active page.
        let url = state
            .sessions
            .active()
            .map(|s| s.url)
            .filter(|u| !u.is_empty())
            .ok_or(DaemonError::NoActiveSession)?;
        cookie["url"] = json!(url);
    }

    if let Some(max_age) = params.max_age {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        #[allow(clippy::cast_possible_wrap)]
        let expires = (now as i64) + max_age;
        cookie["expires"] = json!(expires);
    }

    if let Some(same_site) = &params.same_site {
        let normalized = match same_site.to_lowercase().as_str() {
            "strict" => "Strict",
            "lax" => "Lax",
            "none" => "None",
            other => {
                return Err(DaemonError::InvalidArgument {
                    field: "same_site".into(),
                    reason: format!("unknown SameSite value: {other}"),
                });
            }
        };
        cookie["sameSite"] = json!(normalized);
    }

    let result = cdp(state, "Network.setCookie", Some(cookie), Some(&session_id)).await?;
    if result["success"].as_bool() == Some(false) {
        return Err(DaemonError::InvalidArgument {
            field: "cookie".into(),
            reason: "browser rejected the cookie".into(),
        });
    }
    Ok(json!({"set": params.name}))
}

/// Delete cookies by name. Idempotent: zero matches is success. More than
/// one match without `--domain` reports the candidate domains instead of
/// guessing.
pub async fn delete(state: &DaemonState, params: CookieDeleteParams) -> Result<Value, DaemonError> {
    let session_id = require_browser(state)?;
    ensure_network(state, &session_id).await?;

    let result = cdp(state, "Network.getCookies", None, Some(&session_id)).await?;
    let cookies = result["cookies"].as_array().cloned().unwrap_or_default();

    let matches: Vec<&Value> = cookies
        .iter()
        .filter(|c| {
            c["name"].as_str() == Some(params.name.as_str())
                && params
                    .domain
                    .as_deref()
                    .is_none_or(|d| c["domain"].as_str() == Some(d))
        })
        .collect();

    if matches.is_empty() {
        return Ok(json!({"deleted": 0}));
    }
    if matches.len() > 1 && params.domain.is_none() {
        return Err(DaemonError::AmbiguousTarget {
            matches: matches
                .iter()
                .map(|c| {
                    format!(
                        "{} (domain {})",
                        params.name,
                        c["domain"].as_str().unwrap_or("?")
                    )
                })
                .collect(),
        });
    }

    let mut deleted = 0;
    for cookie in matches {
        let mut delete_params = json!({"name": params.name.clone()});
        if let Some(domain) = cookie["domain"].as_str() {
            delete_params["domain"] = json!(domain);
        }
        if let Some(path) = cookie["path"].as_str() {
            delete_params["path"] = json!(path);
        }
        cdp(
            state,
            "Network.deleteCookies",
            Some(delete_params),
            Some(&session_id),
        )
        .await?;
        deleted += 1;
    }

    Ok(json!({"deleted": deleted}))
}
