#![allow(clippy::doc_markdown)]

//! CLI surface. Every verb is a thin shell over one IPC request; the only
//! verbs with local behaviour are `start` (spawns the daemon) and
//! `stop --force` (kills processes and removes files without the daemon).

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "webctl",
    version,
    about = "Daemon-backed browser automation over the Chrome DevTools Protocol",
    long_about = "webctl automates and introspects a Chromium-family browser on behalf of AI \
        agents. A long-lived daemon owns the CDP connection, buffers console and network \
        events, and serves short-lived CLI invocations over a Unix socket. Start it once with \
        `webctl start`, then drive the browser with the other verbs.",
    term_width = 100
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Output as compact JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output (accepted for compatibility; output is plain)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbose logging
    #[arg(long, global = true, env = "WEBCTL_DEBUG")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Launch the browser and the daemon
    Start(StartArgs),

    /// Stop the daemon (gracefully, or --force)
    Stop(StopArgs),

    /// Show daemon and session status
    Status,

    /// Run the daemon in the foreground (used internally by start)
    #[command(hide = true)]
    Daemon(StartArgs),

    /// Navigate the active session to a URL
    Navigate(NavigateArgs),

    /// Hard-reload the active session
    Reload(WaitArgs),

    /// Go back in history
    Back(WaitArgs),

    /// Go forward in history
    Forward(WaitArgs),

    /// Click the element matching a selector
    Click {
        selector: String,
    },

    /// Type text, optionally into a selector
    Type(TypeArgs),

    /// Press a key with optional modifiers
    Key(KeyArgs),

    /// Focus the element matching a selector
    Focus {
        selector: String,
    },

    /// Set a native <select> element's value
    Select {
        selector: String,
        value: String,
    },

    /// Scroll an element into view, or the window to/by coordinates
    Scroll(ScrollArgs),

    /// Dump page HTML, optionally filtered or saved
    Html(HtmlArgs),

    /// CSS inspection (dump, computed, get, inline, matched)
    Css(CssArgs),

    /// Read buffered console messages
    Console(ConsoleArgs),

    /// Read buffered network requests
    Network(NetworkArgs),

    /// Cookie operations (list, set, delete)
    Cookies(CookiesArgs),

    /// Capture a screenshot to a file
    Screenshot(ScreenshotArgs),

    /// Evaluate a JavaScript expression
    Eval {
        expression: String,
    },

    /// Search page HTML for text (alias over html --find)
    Find(FindArgs),

    /// Wait for a readiness condition
    #[command(
        long_about = "Wait for a readiness condition. When several are given, the strongest \
            wins: --network-idle, then --eval, then the selector; with none of those, waits \
            for the page load event."
    )]
    Ready(ReadyArgs),

    /// List sessions or switch the active one
    Target {
        query: Option<String>,
    },

    /// Start the development server
    Serve(ServeArgs),

    /// Clear event buffers
    Clear {
        /// console or network; both if omitted
        kind: Option<String>,
    },
}

#[derive(Args, Clone)]
pub struct StartArgs {
    /// Launch the browser headless
    #[arg(long)]
    pub headless: bool,

    /// CDP port (0 probes for a free one)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Browser executable path
    #[arg(long, env = "WEBCTL_BROWSER")]
    pub browser_path: Option<std::path::PathBuf>,
}

#[derive(Args)]
pub struct StopArgs {
    /// Kill the daemon and browser processes and remove socket/pidfiles
    #[arg(long)]
    pub force: bool,

    /// With --force: also kill whatever holds this CDP port
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct NavigateArgs {
    pub url: String,

    /// Wait for the load event
    #[arg(long)]
    pub wait: bool,

    /// Timeout in seconds for --wait
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct WaitArgs {
    /// Wait for the load event
    #[arg(long)]
    pub wait: bool,

    /// Timeout in seconds for --wait
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct TypeArgs {
    /// [SELECTOR] TEXT, or just TEXT for the focused element
    #[arg(required = true, num_args = 1..=2)]
    pub args: Vec<String>,

    /// Key to press after typing (e.g. Enter)
    #[arg(long)]
    pub key: Option<String>,

    /// Clear the field first
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,

    #[arg(long)]
    pub ctrl: bool,
    #[arg(long)]
    pub alt: bool,
    #[arg(long)]
    pub shift: bool,
    #[arg(long)]
    pub meta: bool,
}

#[derive(Args)]
pub struct ScrollArgs {
    /// Element to scroll into view
    pub selector: Option<String>,

    /// Scroll to absolute coordinates X,Y
    #[arg(long, value_parser = parse_coords, conflicts_with = "selector")]
    pub to: Option<(f64, f64)>,

    /// Scroll by a delta X,Y
    #[arg(long, value_parser = parse_coords, conflicts_with_all = ["selector", "to"])]
    pub by: Option<(f64, f64)>,
}

/// Parse "X,Y" into a coordinate pair.
pub fn parse_coords(input: &str) -> Result<(f64, f64), String> {
    let (x, y) = input
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {input}"))?;
    let x = x.trim().parse().map_err(|e| format!("bad X: {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y: {e}"))?;
    Ok((x, y))
}

#[derive(Args)]
pub struct HtmlArgs {
    #[command(subcommand)]
    pub command: Option<HtmlCommand>,

    /// Restrict output to elements matching this selector
    #[arg(long)]
    pub select: Option<String>,

    /// Keep only lines containing this text
    #[arg(long)]
    pub find: Option<String>,

    /// Context lines before each match
    #[arg(short = 'B', default_value_t = 0, requires = "find")]
    pub before: usize,

    /// Context lines after each match
    #[arg(short = 'A', default_value_t = 0, requires = "find")]
    pub after: usize,

    /// Context lines around each match
    #[arg(short = 'C', default_value_t = 0, requires = "find")]
    pub context: usize,

    /// Skip pretty-printing
    #[arg(long)]
    pub raw: bool,
}

#[derive(Subcommand)]
pub enum HtmlCommand {
    /// Write the HTML to a file (trailing / means auto-named file in dir)
    Save {
        path: Option<String>,
    },
}

#[derive(Args)]
pub struct CssArgs {
    #[command(subcommand)]
    pub command: Option<CssCommand>,
}

#[derive(Subcommand)]
pub enum CssCommand {
    /// Write all stylesheets to a file
    Save {
        path: Option<String>,
    },
    /// All computed properties of the first match
    Computed {
        selector: String,
    },
    /// One computed property value
    Get {
        selector: String,
        property: String,
    },
    /// The element's style attribute
    Inline {
        selector: String,
    },
    /// Rules matching the element
    Matched {
        selector: String,
    },
    /// Inject a stylesheet (not implemented)
    Inject,
}

#[derive(Args)]
pub struct ConsoleArgs {
    #[command(subcommand)]
    pub command: Option<SaveCommand>,

    /// Comma-separated message types (log,warn,error,info,debug)
    #[arg(long = "type")]
    pub types: Option<String>,

    /// Keep messages containing this text
    #[arg(long)]
    pub find: Option<String>,

    #[command(flatten)]
    pub slice: SliceArgs,
}

#[derive(Args)]
pub struct NetworkArgs {
    #[command(subcommand)]
    pub command: Option<SaveCommand>,

    /// Keep requests whose URL contains this text
    #[arg(long)]
    pub find: Option<String>,

    /// Comma-separated CDP resource types (Document,Script,XHR,...)
    #[arg(long = "type")]
    pub types: Option<String>,

    /// Comma-separated HTTP methods
    #[arg(long)]
    pub method: Option<String>,

    /// Status filter: exact (404), class (4xx), or range (400-499)
    #[arg(long)]
    pub status: Option<String>,

    /// Regular expression matched against the request URL
    #[arg(long)]
    pub url_regex: Option<String>,

    /// Keep responses whose MIME type contains this text
    #[arg(long)]
    pub mime: Option<String>,

    /// Keep requests at least this long, in milliseconds
    #[arg(long)]
    pub min_duration: Option<u64>,

    /// Keep responses at least this large, in bytes
    #[arg(long)]
    pub min_size: Option<u64>,

    /// Keep only failed requests
    #[arg(long)]
    pub failed: bool,

    /// Fetch response bodies
    #[arg(long)]
    pub body: bool,

    /// Truncate fetched bodies beyond this many bytes
    #[arg(long)]
    pub max_body_size: Option<usize>,

    #[command(flatten)]
    pub slice: SliceArgs,
}

#[derive(Subcommand)]
pub enum SaveCommand {
    /// Write the entries to a file
    Save {
        path: Option<String>,
    },
}

#[derive(Args)]
pub struct SliceArgs {
    /// First N entries
    #[arg(long)]
    pub head: Option<usize>,

    /// Last N entries
    #[arg(long)]
    pub tail: Option<usize>,

    /// Entry range START-END (zero-based, end exclusive)
    #[arg(long, value_parser = parse_range)]
    pub range: Option<(usize, usize)>,
}

/// Parse "START-END" into a range pair.
pub fn parse_range(input: &str) -> Result<(usize, usize), String> {
    let (start, end) = input
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got {input}"))?;
    let start = start.trim().parse().map_err(|e| format!("bad start: {e}"))?;
    let end = end.trim().parse().map_err(|e| format!("bad end: {e}"))?;
    Ok((start, end))
}

#[derive(Args)]
pub struct CookiesArgs {
    #[command(subcommand)]
    pub command: Option<CookiesCommand>,

    /// Keep cookies whose name contains this text
    #[arg(long)]
    pub find: Option<String>,
}

#[derive(Subcommand)]
pub enum CookiesCommand {
    /// Write cookies to a file
    Save {
        path: Option<String>,
    },
    /// Set a cookie on the current page
    Set {
        name: String,
        value: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        secure: bool,
        #[arg(long)]
        httponly: bool,
        #[arg(long)]
        max_age: Option<i64>,
        #[arg(long)]
        samesite: Option<String>,
    },
    /// Delete cookies by name (idempotent)
    Delete {
        name: String,
        #[arg(long)]
        domain: Option<String>,
    },
}

#[derive(Args)]
pub struct ScreenshotArgs {
    #[command(subcommand)]
    pub command: Option<SaveCommand>,

    /// Capture beyond the viewport
    #[arg(long)]
    pub full_page: bool,
}

#[derive(Args)]
pub struct FindArgs {
    pub text: String,

    /// Context lines before each match
    #[arg(short = 'B', default_value_t = 0)]
    pub before: usize,

    /// Context lines after each match
    #[arg(short = 'A', default_value_t = 0)]
    pub after: usize,

    /// Context lines around each match
    #[arg(short = 'C', default_value_t = 0)]
    pub context: usize,
}

#[derive(Args)]
pub struct ReadyArgs {
    /// Selector to wait for
    pub selector: Option<String>,

    /// Wait for zero pending requests sustained for 500ms
    #[arg(long)]
    pub network_idle: bool,

    /// Wait for this expression to be truthy
    #[arg(long)]
    pub eval: Option<String>,

    /// Timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Directory to serve (defaults to .)
    pub dir: Option<String>,

    /// Proxy to this upstream URL instead of serving files
    #[arg(long)]
    pub proxy: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Extra watch patterns
    #[arg(long = "watch")]
    pub watch: Vec<String>,

    /// Glob patterns excluded from watching
    #[arg(long = "ignore")]
    pub ignore: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_parser() {
        assert_eq!(parse_coords("10,20").unwrap(), (10.0, 20.0));
        assert_eq!(parse_coords(" 1.5 , -3 ").unwrap(), (1.5, -3.0));
        assert!(parse_coords("10").is_err());
        assert!(parse_coords("a,b").is_err());
    }

    #[test]
    fn range_parser() {
        assert_eq!(parse_range("5-10").unwrap(), (5, 10));
        assert!(parse_range("5").is_err());
    }

    #[test]
    fn cli_parses_representative_verbs() {
        use clap::Parser as _;
        Cli::try_parse_from(["webctl", "start", "--headless", "--port", "9222"]).unwrap();
        Cli::try_parse_from(["webctl", "navigate", "example.com", "--wait"]).unwrap();
        Cli::try_parse_from(["webctl", "click", "#submit"]).unwrap();
        Cli::try_parse_from(["webctl", "type", "#q", "hello", "--key", "Enter"]).unwrap();
        Cli::try_parse_from(["webctl", "key", "r", "--ctrl", "--shift"]).unwrap();
        Cli::try_parse_from(["webctl", "scroll", "--to", "0,500"]).unwrap();
        Cli::try_parse_from(["webctl", "html", "--find", "Login", "-C", "2"]).unwrap();
        Cli::try_parse_from(["webctl", "html", "save", "/tmp/out/"]).unwrap();
        Cli::try_parse_from(["webctl", "css", "get", "body", "color"]).unwrap();
        Cli::try_parse_from(["webctl", "console", "--type", "error", "--tail", "5"]).unwrap();
        Cli::try_parse_from(["webctl", "network", "--status", "4xx", "--body"]).unwrap();
        Cli::try_parse_from(["webctl", "cookies", "set", "k", "v", "--samesite", "lax"]).unwrap();
        Cli::try_parse_from(["webctl", "cookies", "delete", "k"]).unwrap();
        Cli::try_parse_from(["webctl", "ready", "--network-idle", "--timeout", "5"]).unwrap();
        Cli::try_parse_from(["webctl", "serve", ".", "--port", "3000"]).unwrap();
        Cli::try_parse_from(["webctl", "stop", "--force", "--port", "9222"]).unwrap();
    }

    #[test]
    fn scroll_modes_conflict() {
        use clap::Parser as _;
        assert!(Cli::try_parse_from(["webctl", "scroll", "#el", "--to", "0,0"]).is_err());
        assert!(Cli::try_parse_from(["webctl", "scroll", "--to", "0,0", "--by", "1,1"]).is_err());
    }

    #[test]
    fn type_requires_text() {
        use clap::Parser as _;
        assert!(Cli::try_parse_from(["webctl", "type"]).is_err());
        Cli::try_parse_from(["webctl", "type", "just text"]).unwrap();
    }
}
