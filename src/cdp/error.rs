use std::fmt;

/// Errors surfaced by the CDP client.
#[derive(Debug)]
pub enum CdpError {
    /// WebSocket connection could not be established.
    Connection(String),

    /// Connection attempt exceeded the configured timeout.
    ConnectionTimeout,

    /// A request did not receive a reply within its deadline.
    CommandTimeout {
        /// The CDP method that timed out.
        method: String,
    },

    /// The browser returned a structured protocol error.
    Protocol {
        code: i64,
        message: String,
    },

    /// The connection is gone — closed voluntarily or lost. Outstanding
    /// and future sends on this client all resolve with this variant.
    ClientClosed,

    /// A reply arrived but its shape was unusable.
    InvalidResponse(String),

    /// Transport task died, channel closed, or a serialization failure.
    Internal(String),
}

impl CdpError {
    /// Whether this error means the browser connection is unusable.
    ///
    /// The daemon treats these as fatal: it clears sessions and shuts down
    /// rather than retrying.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ClientClosed | Self::Connection(_) | Self::Internal(_)
        )
    }
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "CDP connection error: {msg}"),
            Self::ConnectionTimeout => write!(f, "CDP connection timed out"),
            Self::CommandTimeout { method } => {
                write!(f, "CDP command timed out: {method}")
            }
            Self::Protocol { code, message } => {
                write!(f, "CDP protocol error ({code}): {message}")
            }
            Self::ClientClosed => write!(f, "CDP client is closed"),
            Self::InvalidResponse(msg) => write!(f, "CDP invalid response: {msg}"),
            Self::Internal(msg) => write!(f, "CDP internal error: {msg}"),
        }
    }
}

impl std::error::Error for CdpError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_command_timeout() {
        let err = CdpError::CommandTimeout {
            method: "Page.navigate".into(),
        };
        assert_eq!(err.to_string(), "CDP command timed out: Page.navigate");
    }

    #[test]
    fn display_protocol() {
        let err = CdpError::Protocol {
            code: -32000,
            message: "Could not find node".into(),
        };
        assert_eq!(
            err.to_string(),
            "CDP protocol error (-32000): Could not find node"
        );
    }

    #[test]
    fn display_client_closed() {
        assert_eq!(CdpError::ClientClosed.to_string(), "CDP client is closed");
    }

    #[test]
    fn connection_loss_classification() {
        assert!(CdpError::ClientClosed.is_connection_loss());
        assert!(CdpError::Connection("reset".into()).is_connection_loss());
        assert!(CdpError::Internal("transport task is not running".into()).is_connection_loss());
        assert!(
            !CdpError::Protocol {
                code: -32601,
                message: "unknown method".into()
            }
            .is_connection_loss()
        );
        assert!(
            !CdpError::CommandTimeout {
                method: "DOM.getDocument".into()
            }
            .is_connection_loss()
        );
    }
}
