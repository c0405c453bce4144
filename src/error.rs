use std::fmt;

use crate::browser::BrowserError;
use crate::cdp::CdpError;

/// Errors surfaced at the IPC boundary.
///
/// The `Display` text is what CLI clients receive in the response `error`
/// field; keep the messages stable.
#[derive(Debug)]
pub enum DaemonError {
    /// No daemon socket, or connecting to it failed. Client-originated —
    /// the daemon itself never produces this.
    DaemonNotRunning,

    /// `start` while a pidfile or socket already exists.
    AlreadyRunning(String),

    /// An explicitly requested CDP port is unavailable.
    PortInUse(u16),

    /// A command needs a page but no session is attached.
    NoActiveSession,

    /// The CDP connection died; the daemon is shutting down.
    BrowserConnectionLost,

    /// A selector matched no element.
    ElementNotFound {
        selector: String,
    },

    /// The element exists but has no box model (hidden or out of frame).
    NotVisible {
        selector: String,
    },

    /// `Page.navigate` reported an error.
    NavigationFailed {
        error_text: String,
    },

    /// `back` at the beginning of history.
    NoPreviousPage,

    /// `forward` at the end of history.
    NoNextPage,

    /// A wait ran out of time.
    Timeout {
        what: String,
    },

    /// A session query matched more than one session.
    AmbiguousTarget {
        matches: Vec<String>,
    },

    /// A session query matched nothing.
    TargetNotFound {
        query: String,
    },

    /// Local request validation failed.
    InvalidArgument {
        field: String,
        reason: String,
    },

    /// Pass-through browser protocol error.
    Cdp {
        code: i64,
        message: String,
    },

    /// Feature intentionally not provided.
    NotImplemented {
        what: String,
        hint: String,
    },

    /// Browser could not be located or launched.
    Launch(String),

    /// Filesystem failure while saving output.
    Save(String),

    /// Invariant violation; the daemon shuts down after reporting this.
    Internal(String),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DaemonNotRunning => {
                write!(f, "daemon is not running")
            }
            Self::AlreadyRunning(detail) => {
                write!(f, "daemon already running: {detail}")
            }
            Self::PortInUse(port) => write!(f, "CDP port {port} is already in use"),
            Self::NoActiveSession => write!(f, "no active browser session"),
            Self::BrowserConnectionLost => {
                write!(f, "browser connection lost; daemon is shutting down")
            }
            Self::ElementNotFound { selector } => {
                write!(f, "no element matches selector: {selector}")
            }
            Self::NotVisible { selector } => {
                write!(f, "element is not visible: {selector}")
            }
            Self::NavigationFailed { error_text } => {
                write!(f, "navigation failed: {error_text}")
            }
            Self::NoPreviousPage => write!(f, "no previous page in history"),
            Self::NoNextPage => write!(f, "no next page in history"),
            Self::Timeout { what } => write!(f, "timed out waiting for {what}"),
            Self::AmbiguousTarget { matches } => {
                write!(f, "ambiguous target, matches: {}", matches.join(", "))
            }
            Self::TargetNotFound { query } => {
                write!(f, "no session matches: {query}")
            }
            Self::InvalidArgument { field, reason } => {
                write!(f, "invalid argument {field}: {reason}")
            }
            Self::Cdp { code, message } => {
                write!(f, "CDP error ({code}): {message}")
            }
            Self::NotImplemented { what, hint } => {
                write!(f, "{what} is not implemented: {hint}")
            }
            Self::Launch(msg) => write!(f, "{msg}"),
            Self::Save(msg) => write!(f, "could not save output: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<CdpError> for DaemonError {
    fn from(e: CdpError) -> Self {
        match e {
            CdpError::Protocol { code, message } => Self::Cdp { code, message },
            CdpError::CommandTimeout { method } => Self::Timeout { what: method },
            // A reply we could not use is reported like a protocol error;
            // it is not grounds for shutting the daemon down.
            CdpError::InvalidResponse(msg) => Self::Cdp {
                code: 0,
                message: msg,
            },
            // Connection-class errors all mean the browser is gone.
            CdpError::ClientClosed
            | CdpError::Connection(_)
            | CdpError::ConnectionTimeout
            | CdpError::Internal(_) => Self::BrowserConnectionLost,
        }
    }
}

impl From<BrowserError> for DaemonError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::PortInUse { port } => Self::PortInUse(port),
            other => Self::Launch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_element_not_found() {
        let err = DaemonError::ElementNotFound {
            selector: "#missing".into(),
        };
        assert_eq!(err.to_string(), "no element matches selector: #missing");
    }

    #[test]
    fn display_ambiguous_target() {
        let err = DaemonError::AmbiguousTarget {
            matches: vec!["Example".into(), "Example Two".into()],
        };
        assert_eq!(
            err.to_string(),
            "ambiguous target, matches: Example, Example Two"
        );
    }

    #[test]
    fn cdp_protocol_error_passes_through() {
        let err: DaemonError = CdpError::Protocol {
            code: -32601,
            message: "method not found".into(),
        }
        .into();
        assert!(matches!(err, DaemonError::Cdp { code: -32601, .. }));
    }

    #[test]
    fn connection_class_errors_map_to_lost() {
        for cdp_err in [
            CdpError::ClientClosed,
            CdpError::Connection("reset by peer".into()),
            CdpError::Internal("transport task is not running".into()),
        ] {
            let err: DaemonError = cdp_err.into();
            assert!(matches!(err, DaemonError::BrowserConnectionLost));
        }
    }

    #[test]
    fn port_in_use_maps_from_browser_error() {
        let err: DaemonError = BrowserError::PortInUse { port: 9222 }.into();
        assert!(matches!(err, DaemonError::PortInUse(9222)));
    }

    #[test]
    fn timeout_keeps_the_condition_description() {
        let err = DaemonError::Timeout {
            what: "network idle".into(),
        };
        assert_eq!(err.to_string(), "timed out waiting for network idle");
    }
}
