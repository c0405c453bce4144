//! Request routing: command name → typed params → handler.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use super::DaemonState;
use super::handlers::{self, parse_params};
use crate::error::DaemonError;
use crate::protocol::{Request, Response};

/// Route one IPC request and shape the response.
pub async fn dispatch(state: &Arc<DaemonState>, request: Request) -> Response {
    match route(state, &request).await {
        Ok(data) => Response::success(data),
        Err(e) => {
            if matches!(e, DaemonError::Internal(_)) {
                // Invariant violations are fatal by policy.
                error!(error = %e, "internal error, shutting down");
                state.begin_shutdown();
            }
            Response::failure(&e)
        }
    }
}

async fn route(state: &Arc<DaemonState>, request: &Request) -> Result<Value, DaemonError> {
    let p = &request.params;
    match request.cmd.as_str() {
        "navigate" => handlers::navigate::navigate(state, parse_params(p)?).await,
        "reload" => handlers::navigate::reload(state, parse_params(p)?).await,
        "back" => handlers::navigate::back(state, parse_params(p)?).await,
        "forward" => handlers::navigate::forward(state, parse_params(p)?).await,

        "click" => handlers::input::click(state, parse_params(p)?).await,
        "type" => handlers::input::type_text(state, parse_params(p)?).await,
        "key" => handlers::input::key(state, parse_params(p)?).await,
        "focus" => handlers::input::focus(state, parse_params(p)?).await,
        "select" => handlers::input::select(state, parse_params(p)?).await,
        "scroll" => handlers::input::scroll(state, parse_params(p)?).await,

        "eval" => handlers::page::eval(state, parse_params(p)?).await,
        "html" => handlers::page::html(state, parse_params(p)?).await,
        "find" => handlers::page::find(state, parse_params(p)?).await,
        "screenshot" => handlers::page::screenshot(state, parse_params(p)?).await,

        "css" => handlers::css::css(state, parse_params(p)?).await,

        "console" => handlers::console::console(state, parse_params(p)?).await,
        "network" => handlers::network::network(state, parse_params(p)?).await,
        "cookies" => handlers::cookies::list(state, parse_params(p)?).await,
        "cookies.set" => handlers::cookies::set(state, parse_params(p)?).await,
        "cookies.delete" => handlers::cookies::delete(state, parse_params(p)?).await,

        "ready" => handlers::ready::ready(state, parse_params(p)?).await,

        "target" => handlers::control::target(state, parse_params(p)?),
        "status" => handlers::control::status(state),
        "clear" => handlers::control::clear(state, parse_params(p)?),
        "serve" => handlers::control::serve(state, parse_params(p)?).await,
        "stop" => Ok(handlers::control::stop(state)),

        other => Err(DaemonError::InvalidArgument {
            field: "cmd".into(),
            reason: format!("unknown command: {other}"),
        }),
    }
}
