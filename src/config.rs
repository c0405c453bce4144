use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Process-wide daemon configuration, frozen after [`resolve`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Launch the browser headless.
    pub headless: bool,
    /// CDP port; 0 means "probe for a free one".
    pub cdp_port: u16,
    /// Explicit browser executable, overriding platform lookup.
    pub browser_path: Option<PathBuf>,
    /// Unix socket the IPC server listens on.
    pub socket_path: PathBuf,
    /// File holding the daemon PID in decimal ASCII.
    pub pidfile_path: PathBuf,
    /// File holding the launched browser's PID (used by `stop --force`).
    pub browser_pidfile_path: PathBuf,
    /// Verbose logging.
    pub debug: bool,
}

/// Overrides collected from CLI flags; `None` fields fall back to the
/// config file and then to built-in defaults.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub headless: Option<bool>,
    pub cdp_port: Option<u16>,
    pub browser_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    pub debug: Option<bool>,
}

/// Parsed TOML config file. All fields optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub daemon: DaemonSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub headless: Option<bool>,
    pub cdp_port: Option<u16>,
    pub browser_path: Option<String>,
    pub socket_path: Option<String>,
    pub debug: Option<bool>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Directory for sockets and pidfiles: the platform runtime dir when
/// available, otherwise the temp dir.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("webctl")
}

/// Default Unix socket path.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join("webctl.sock")
}

/// Default daemon pidfile path.
#[must_use]
pub fn default_pidfile_path() -> PathBuf {
    runtime_dir().join("webctl.pid")
}

/// Default browser pidfile path.
#[must_use]
pub fn default_browser_pidfile_path() -> PathBuf {
    runtime_dir().join("webctl-browser.pid")
}

/// Find the first config file that exists, in priority order:
///
/// 1. `$WEBCTL_CONFIG`
/// 2. `./.webctl.toml` (project-local)
/// 3. `<config_dir>/webctl/config.toml`
/// 4. `~/.webctl.toml`
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    find_config_file_with(std::env::var("WEBCTL_CONFIG").ok())
}

/// Testable variant of [`find_config_file`] that accepts the env value.
#[must_use]
pub fn find_config_file_with(env_config: Option<String>) -> Option<PathBuf> {
    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from(".webctl.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("webctl").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".webctl.toml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Load and parse the config file, if any.
///
/// Parse errors are reported on stderr and treated as an empty file; a bad
/// config never prevents startup.
#[must_use]
pub fn load_config_file() -> ConfigFile {
    match find_config_file() {
        Some(path) => load_config_from(&path),
        None => ConfigFile::default(),
    }
}

/// Load and parse a config file from a specific path.
#[must_use]
pub fn load_config_from(path: &Path) -> ConfigFile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("warning: could not read config file {}: {e}", path.display());
            return ConfigFile::default();
        }
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: could not parse config file {}: {e}", path.display());
            ConfigFile::default()
        }
    }
}

/// Merge CLI overrides, the config file, and built-in defaults into a
/// frozen [`DaemonConfig`]. Precedence: CLI > file > defaults.
#[must_use]
pub fn resolve(overrides: &Overrides, file: &ConfigFile) -> DaemonConfig {
    let socket_path = overrides
        .socket_path
        .clone()
        .or_else(|| file.daemon.socket_path.clone().map(PathBuf::from))
        .unwrap_or_else(default_socket_path);

    DaemonConfig {
        headless: overrides
            .headless
            .or(file.daemon.headless)
            .unwrap_or(false),
        cdp_port: overrides.cdp_port.or(file.daemon.cdp_port).unwrap_or(0),
        browser_path: overrides
            .browser_path
            .clone()
            .or_else(|| file.daemon.browser_path.clone().map(PathBuf::from)),
        socket_path,
        pidfile_path: default_pidfile_path(),
        browser_pidfile_path: default_browser_pidfile_path(),
        debug: overrides.debug.or(file.daemon.debug).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file_or_flags() {
        let config = resolve(&Overrides::default(), &ConfigFile::default());
        assert!(!config.headless);
        assert_eq!(config.cdp_port, 0);
        assert!(!config.debug);
        assert!(config.socket_path.ends_with("webctl/webctl.sock"));
    }

    #[test]
    fn cli_overrides_beat_file() {
        let file = ConfigFile {
            daemon: DaemonSection {
                headless: Some(false),
                cdp_port: Some(9300),
                ..DaemonSection::default()
            },
        };
        let overrides = Overrides {
            headless: Some(true),
            cdp_port: Some(9222),
            ..Overrides::default()
        };
        let config = resolve(&overrides, &file);
        assert!(config.headless);
        assert_eq!(config.cdp_port, 9222);
    }

    #[test]
    fn file_fills_unset_flags() {
        let file = ConfigFile {
            daemon: DaemonSection {
                headless: Some(true),
                socket_path: Some("/tmp/custom.sock".into()),
                ..DaemonSection::default()
            },
        };
        let config = resolve(&Overrides::default(), &file);
        assert!(config.headless);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
    }

    #[test]
    fn parse_daemon_section() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[daemon]\nheadless = true\ncdp_port = 9250\ndebug = true"
        )
        .unwrap();
        let parsed = load_config_from(f.path());
        assert_eq!(parsed.daemon.headless, Some(true));
        assert_eq!(parsed.daemon.cdp_port, Some(9250));
        assert_eq!(parsed.daemon.debug, Some(true));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "this is not toml [[[").unwrap();
        let parsed = load_config_from(f.path());
        assert!(parsed.daemon.headless.is_none());
    }

    #[test]
    fn env_config_path_wins_when_it_exists() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let found =
            find_config_file_with(Some(f.path().to_string_lossy().into_owned())).unwrap();
        assert_eq!(found, f.path());
    }
}
