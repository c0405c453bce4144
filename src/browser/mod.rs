//! Browser process management: binary lookup, debug-port selection,
//! launch, and `/json/version` endpoint discovery.

mod discovery;
mod error;
mod launcher;
mod platform;

pub use discovery::{BrowserVersion, TargetSummary, query_targets, query_version};
pub use error::BrowserError;
pub use launcher::{BrowserProcess, LaunchConfig, launch_browser, pick_debug_port};
pub use platform::find_browser_executable;
