//! Console buffer reads.

use serde_json::{Value, json};

use super::page::write_output;
use crate::daemon::DaemonState;
use crate::error::DaemonError;
use crate::protocol::ConsoleParams;
use crate::savepath;

pub async fn console(state: &DaemonState, params: ConsoleParams) -> Result<Value, DaemonError> {
    params.slice.validate()?;

    // Buffer reads never touch the browser; no liveness gate needed.
    let entries = state.console.snapshot(&params.filter);
    let entries = params.slice.apply(entries);

    if params.save {
        let serialized = serde_json::to_string_pretty(&entries)
            .map_err(|e| DaemonError::Internal(e.to_string()))?;
        let path = savepath::resolve(params.path.as_deref(), "console", "console", "json");
        return write_output(&path, serialized.as_bytes());
    }

    let count = entries.len();
    Ok(json!({"entries": entries, "count": count}))
}
