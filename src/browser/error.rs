use std::fmt;

/// Errors that can occur while locating, launching, or probing the browser.
#[derive(Debug)]
pub enum BrowserError {
    /// No Chromium-family executable could be located.
    NotFound(String),

    /// The browser process failed to spawn or exited early.
    LaunchFailed(String),

    /// An explicitly requested CDP port is already taken.
    PortInUse {
        port: u16,
    },

    /// No free port in the probe range.
    NoFreePort,

    /// The browser did not start accepting CDP connections in time.
    StartupTimeout {
        port: u16,
    },

    /// HTTP request to the discovery endpoint failed.
    Http(String),

    /// Failed to parse a discovery response.
    Parse(String),

    /// An I/O error occurred.
    Io(std::io::Error),
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "browser not found: {msg}"),
            Self::LaunchFailed(msg) => write!(f, "browser launch failed: {msg}"),
            Self::PortInUse { port } => {
                write!(f, "CDP port {port} is already in use")
            }
            Self::NoFreePort => write!(f, "no free CDP port in the probe range"),
            Self::StartupTimeout { port } => {
                write!(f, "browser startup timed out on port {port}")
            }
            Self::Http(msg) => write!(f, "browser endpoint HTTP error: {msg}"),
            Self::Parse(msg) => write!(f, "browser endpoint parse error: {msg}"),
            Self::Io(e) => write!(f, "browser I/O error: {e}"),
        }
    }
}

impl std::error::Error for BrowserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrowserError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_port_in_use() {
        let err = BrowserError::PortInUse { port: 9222 };
        assert_eq!(err.to_string(), "CDP port 9222 is already in use");
    }

    #[test]
    fn display_startup_timeout() {
        let err = BrowserError::StartupTimeout { port: 9230 };
        assert_eq!(err.to_string(), "browser startup timed out on port 9230");
    }

    #[test]
    fn display_not_found() {
        let err = BrowserError::NotFound("set WEBCTL_BROWSER".into());
        assert_eq!(err.to_string(), "browser not found: set WEBCTL_BROWSER");
    }

    #[test]
    fn io_error_has_source() {
        let err = BrowserError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.source().is_some());
    }
}
