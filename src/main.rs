use std::path::Path;
use std::time::Duration;

use clap::{Parser, error::ErrorKind};
use serde_json::{Value, json};

use webctl::cli::{
    Cli, Command, CookiesCommand, CssCommand, GlobalOpts, HtmlCommand, SaveCommand, StartArgs,
    StopArgs,
};
use webctl::config::{self, DaemonConfig, Overrides};
use webctl::error::DaemonError;
use webctl::protocol::{Request, Response};
use webctl::{client, daemon};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print().expect("failed to write to stdout");
                std::process::exit(0);
            }
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = resolve_config(&cli);

    match cli.command {
        Command::Daemon(_) => run_daemon(config).await,
        Command::Start(ref args) => start(&config, args, &cli.global).await,
        Command::Stop(ref args) => stop(&config, args, &cli.global).await,
        Command::Status => status(&config, &cli.global).await,
        ref command => {
            let (cmd, params) = build_request(command);
            let request = Request {
                cmd: cmd.to_owned(),
                params,
                json: cli.global.json,
            };
            match client::send_request(&config.socket_path, &request).await {
                Ok(response) => print_response(&response, &cli.global),
                Err(e) => {
                    print_error(&e, &cli.global);
                    1
                }
            }
        }
    }
}

/// Merge CLI flags over the config file. Start/daemon flags carry the
/// launch settings; other verbs only need the socket path.
fn resolve_config(cli: &Cli) -> DaemonConfig {
    let mut overrides = Overrides {
        debug: cli.global.debug.then_some(true),
        ..Overrides::default()
    };
    if let Command::Start(args) | Command::Daemon(args) = &cli.command {
        overrides.headless = args.headless.then_some(true);
        if args.port != 0 {
            overrides.cdp_port = Some(args.port);
        }
        overrides.browser_path.clone_from(&args.browser_path);
    }
    config::resolve(&overrides, &config::load_config_file())
}

// =============================================================================
// Daemon lifecycle verbs
// =============================================================================

async fn run_daemon(config: DaemonConfig) -> i32 {
    init_tracing(config.debug);
    match daemon::run(config).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", json!({"error": e.to_string()}));
            1
        }
    }
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;
    let default_filter = if debug { "webctl=debug" } else { "webctl=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Spawn the daemon as a detached child and wait for its socket.
async fn start(config: &DaemonConfig, args: &StartArgs, global: &GlobalOpts) -> i32 {
    if client::daemon_reachable(&config.socket_path) {
        let err = DaemonError::AlreadyRunning(format!(
            "socket {} is live",
            config.socket_path.display()
        ));
        print_error(&err, global);
        if !global.json {
            eprintln!("hint: use `webctl stop` first, or `webctl stop --force` if it is stuck");
        }
        return 1;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            print_error(&DaemonError::Launch(format!("cannot find own binary: {e}")), global);
            return 1;
        }
    };

    let log_path = config
        .socket_path
        .parent()
        .map_or_else(|| Path::new("/tmp").to_path_buf(), Path::to_path_buf)
        .join("webctl.log");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let log = match std::fs::File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            print_error(&DaemonError::Launch(format!("cannot open log file: {e}")), global);
            return 1;
        }
    };

    let mut command = std::process::Command::new(exe);
    command.arg("daemon");
    if args.headless {
        command.arg("--headless");
    }
    if args.port != 0 {
        command.args(["--port", &args.port.to_string()]);
    }
    if let Some(path) = &args.browser_path {
        command.arg("--browser-path").arg(path);
    }
    if global.debug {
        command.arg("--debug");
    }
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(log);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            print_error(&DaemonError::Launch(format!("cannot spawn daemon: {e}")), global);
            return 1;
        }
    };

    // The daemon binds the socket only after the browser is up.
    let wait_start = std::time::Instant::now();
    while wait_start.elapsed() < Duration::from_secs(45) {
        if client::daemon_reachable(&config.socket_path) {
            return status(config, global).await;
        }
        if let Ok(Some(exit)) = child.try_wait() {
            print_error(
                &DaemonError::Launch(format!(
                    "daemon exited with {exit} during startup; see {}",
                    log_path.display()
                )),
                global,
            );
            return 1;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    print_error(
        &DaemonError::Launch(format!(
            "daemon did not come up in time; see {}",
            log_path.display()
        )),
        global,
    );
    1
}

async fn status(config: &DaemonConfig, global: &GlobalOpts) -> i32 {
    let request = Request {
        cmd: "status".into(),
        params: json!({}),
        json: global.json,
    };
    match client::send_request(&config.socket_path, &request).await {
        Ok(response) => print_response(&response, global),
        Err(DaemonError::DaemonNotRunning) => {
            print_data(&json!({"running": false}), global);
            0
        }
        Err(e) => {
            print_error(&e, global);
            1
        }
    }
}

async fn stop(config: &DaemonConfig, args: &StopArgs, global: &GlobalOpts) -> i32 {
    if args.force {
        let actions = force_stop(config, args.port);
        print_data(&json!({"actions": actions}), global);
        return 0;
    }

    let request = Request {
        cmd: "stop".into(),
        params: json!({}),
        json: global.json,
    };
    match client::send_request(&config.socket_path, &request).await {
        Ok(response) => print_response(&response, global),
        Err(e) => {
            print_error(&e, global);
            if !global.json && matches!(e, DaemonError::DaemonNotRunning) {
                eprintln!("hint: use `webctl stop --force` to clean up leftover files");
            }
            1
        }
    }
}

// =============================================================================
// Force stop
// =============================================================================

/// Best-effort cleanup without daemon cooperation. Every step reports its
/// own outcome; nothing here aborts early.
fn force_stop(config: &DaemonConfig, port: Option<u16>) -> Vec<Value> {
    let mut actions = Vec::new();

    match read_pidfile(&config.pidfile_path) {
        Some(pid) => {
            kill_process(pid);
            actions.push(json!({"action": format!("killed daemon (PID {pid})"), "ok": true}));
        }
        None => actions.push(json!({"action": "no live daemon PID found", "ok": true})),
    }

    match read_pidfile(&config.browser_pidfile_path) {
        Some(pid) => {
            kill_process(pid);
            actions.push(json!({
                "action": format!("killed browser (PID {pid}) on port {}", port.unwrap_or(config.cdp_port)),
                "ok": true
            }));
        }
        None => actions.push(json!({"action": "no live browser PID found", "ok": true})),
    }

    // Only with an explicit --port: kill whatever else holds the CDP port.
    if let Some(port) = port {
        match pid_listening_on(port) {
            Some(pid) => {
                kill_process(pid);
                actions.push(json!({
                    "action": format!("killed process (PID {pid}) holding port {port}"),
                    "ok": true
                }));
            }
            None => actions.push(json!({
                "action": format!("no process found on port {port}"),
                "ok": true
            })),
        }
    }

    for (label, path) in [
        ("socket file", &config.socket_path),
        ("pidfile", &config.pidfile_path),
        ("browser pidfile", &config.browser_pidfile_path),
    ] {
        match std::fs::remove_file(path) {
            Ok(()) => actions.push(json!({"action": format!("removed {label}"), "ok": true})),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                actions.push(json!({"action": format!("{label} already absent"), "ok": true}));
            }
            Err(e) => actions.push(json!({
                "action": format!("could not remove {label}: {e}"),
                "ok": false
            })),
        }
    }

    actions
}

/// Read a pidfile and return the PID only if that process is alive.
fn read_pidfile(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;
    #[allow(clippy::cast_possible_wrap)]
    let alive = unsafe { libc::kill(pid as i32, 0) == 0 };
    alive.then_some(pid)
}

/// Terminate a process: SIGTERM the process group, poll for exit, escalate
/// to SIGKILL.
fn kill_process(pid: u32) {
    #[allow(clippy::cast_possible_wrap)]
    let pid_i32 = pid as i32;

    // Negative pid targets the whole process group; fall back to the single
    // process when the target never became a group leader.
    let term_result = unsafe { libc::kill(-pid_i32, libc::SIGTERM) };
    if term_result != 0 {
        unsafe { libc::kill(pid_i32, libc::SIGTERM) };
    }

    let poll_interval = Duration::from_millis(100);
    let max_wait = Duration::from_secs(2);
    let start = std::time::Instant::now();
    while start.elapsed() < max_wait {
        let exists = unsafe { libc::kill(pid_i32, 0) };
        if exists != 0 {
            return;
        }
        std::thread::sleep(poll_interval);
    }

    let kill_result = unsafe { libc::kill(-pid_i32, libc::SIGKILL) };
    if kill_result != 0 {
        unsafe { libc::kill(pid_i32, libc::SIGKILL) };
    }
}

/// Find the PID listening on a local TCP port via procfs.
#[cfg(target_os = "linux")]
fn pid_listening_on(port: u16) -> Option<u32> {
    const TCP_LISTEN: &str = "0A";

    let mut inode = None;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                continue;
            }
            let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
                continue;
            };
            if u16::from_str_radix(port_hex, 16) == Ok(port) {
                inode = Some(fields[9].to_owned());
                break;
            }
        }
    }
    let inode = inode?;
    let needle = format!("socket:[{inode}]");

    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link.to_string_lossy() == needle {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn pid_listening_on(_port: u16) -> Option<u32> {
    None
}

// =============================================================================
// Verb → request mapping
// =============================================================================

#[allow(clippy::too_many_lines)]
fn build_request(command: &Command) -> (&'static str, Value) {
    match command {
        Command::Navigate(args) => (
            "navigate",
            json!({
                "url": args.url,
                "wait": args.wait,
                "timeout_ms": args.timeout.map(|s| s * 1000),
            }),
        ),
        Command::Reload(args) => (
            "reload",
            json!({"wait": args.wait, "timeout_ms": args.timeout.map(|s| s * 1000)}),
        ),
        Command::Back(args) => (
            "back",
            json!({"wait": args.wait, "timeout_ms": args.timeout.map(|s| s * 1000)}),
        ),
        Command::Forward(args) => (
            "forward",
            json!({"wait": args.wait, "timeout_ms": args.timeout.map(|s| s * 1000)}),
        ),
        Command::Click { selector } => ("click", json!({"selector": selector})),
        Command::Type(args) => {
            let (selector, text) = match args.args.as_slice() {
                [text] => (None, text.clone()),
                [selector, text] => (Some(selector.clone()), text.clone()),
                _ => (None, String::new()),
            };
            (
                "type",
                json!({
                    "selector": selector,
                    "text": text,
                    "key": args.key,
                    "clear": args.clear,
                }),
            )
        }
        Command::Key(args) => (
            "key",
            json!({
                "key": args.key,
                "ctrl": args.ctrl,
                "alt": args.alt,
                "shift": args.shift,
                "meta": args.meta,
            }),
        ),
        Command::Focus { selector } => ("focus", json!({"selector": selector})),
        Command::Select { selector, value } => {
            ("select", json!({"selector": selector, "value": value}))
        }
        Command::Scroll(args) => (
            "scroll",
            json!({"selector": args.selector, "to": args.to, "by": args.by}),
        ),
        Command::Html(args) => {
            let find = args.find.as_ref().map(|text| {
                json!({
                    "text": text,
                    "before": args.before,
                    "after": args.after,
                    "context": args.context,
                })
            });
            let (save, path) = match &args.command {
                Some(HtmlCommand::Save { path }) => (true, path.clone()),
                None => (false, None),
            };
            (
                "html",
                json!({
                    "select": args.select,
                    "find": find,
                    "raw": args.raw,
                    "save": save,
                    "path": path,
                }),
            )
        }
        Command::Css(args) => {
            let params = match &args.command {
                None => json!({"action": "dump"}),
                Some(CssCommand::Save { path }) => json!({"action": "save", "path": path}),
                Some(CssCommand::Computed { selector }) => {
                    json!({"action": "computed", "selector": selector})
                }
                Some(CssCommand::Get { selector, property }) => {
                    json!({"action": "get", "selector": selector, "property": property})
                }
                Some(CssCommand::Inline { selector }) => {
                    json!({"action": "inline", "selector": selector})
                }
                Some(CssCommand::Matched { selector }) => {
                    json!({"action": "matched", "selector": selector})
                }
                Some(CssCommand::Inject) => json!({"action": "inject"}),
            };
            ("css", params)
        }
        Command::Console(args) => {
            let types = args
                .types
                .as_ref()
                .map(|t| t.split(',').map(str::trim).collect::<Vec<_>>());
            let (save, path) = match &args.command {
                Some(SaveCommand::Save { path }) => (true, path.clone()),
                None => (false, None),
            };
            (
                "console",
                json!({
                    "filter": {"types": types, "find": args.find},
                    "slice": {"head": args.slice.head, "tail": args.slice.tail, "range": args.slice.range},
                    "save": save,
                    "path": path,
                }),
            )
        }
        Command::Network(args) => {
            let split = |s: &Option<String>| {
                s.as_ref()
                    .map(|v| v.split(',').map(str::trim).map(str::to_owned).collect::<Vec<_>>())
            };
            let (save, path) = match &args.command {
                Some(SaveCommand::Save { path }) => (true, path.clone()),
                None => (false, None),
            };
            (
                "network",
                json!({
                    "filter": {
                        "find": args.find,
                        "types": split(&args.types),
                        "methods": split(&args.method),
                        "status": args.status,
                        "url_regex": args.url_regex,
                        "mime": args.mime,
                        "min_duration_ms": args.min_duration,
                        "min_size": args.min_size,
                        "failed": args.failed,
                    },
                    "slice": {"head": args.slice.head, "tail": args.slice.tail, "range": args.slice.range},
                    "body": args.body,
                    "max_body_size": args.max_body_size,
                    "save": save,
                    "path": path,
                }),
            )
        }
        Command::Cookies(args) => match &args.command {
            None => ("cookies", json!({"find": args.find})),
            Some(CookiesCommand::Save { path }) => {
                ("cookies", json!({"find": args.find, "save": true, "path": path}))
            }
            Some(CookiesCommand::Set {
                name,
                value,
                domain,
                path,
                secure,
                httponly,
                max_age,
                samesite,
            }) => (
                "cookies.set",
                json!({
                    "name": name,
                    "value": value,
                    "domain": domain,
                    "path": path,
                    "secure": secure,
                    "http_only": httponly,
                    "max_age": max_age,
                    "same_site": samesite,
                }),
            ),
            Some(CookiesCommand::Delete { name, domain }) => {
                ("cookies.delete", json!({"name": name, "domain": domain}))
            }
        },
        Command::Screenshot(args) => {
            let (_, path) = match &args.command {
                Some(SaveCommand::Save { path }) => (true, path.clone()),
                None => (false, None),
            };
            ("screenshot", json!({"path": path, "full_page": args.full_page}))
        }
        Command::Eval { expression } => ("eval", json!({"expression": expression})),
        Command::Find(args) => (
            "find",
            json!({
                "text": args.text,
                "before": args.before,
                "after": args.after,
                "context": args.context,
            }),
        ),
        Command::Ready(args) => (
            "ready",
            json!({
                "selector": args.selector,
                "network_idle": args.network_idle,
                "eval": args.eval,
                "timeout_ms": args.timeout.map(|s| s * 1000),
            }),
        ),
        Command::Target { query } => ("target", json!({"query": query})),
        Command::Serve(args) => (
            "serve",
            json!({
                "dir": args.dir,
                "proxy": args.proxy,
                "port": args.port,
                "host": args.host,
                "watch": args.watch,
                "ignore": args.ignore,
            }),
        ),
        Command::Clear { kind } => ("clear", json!({"kind": kind})),
        Command::Start(_) | Command::Stop(_) | Command::Status | Command::Daemon(_) => {
            unreachable!("handled before build_request")
        }
    }
}

// =============================================================================
// Output
// =============================================================================

fn print_response(response: &Response, global: &GlobalOpts) -> i32 {
    if response.ok {
        if let Some(data) = &response.data {
            print_data(data, global);
        }
        0
    } else {
        let message = response.error.as_deref().unwrap_or("unknown error");
        eprintln!("{}", json!({"error": message}));
        1
    }
}

/// Render response data. Plain mode unwraps single-string payloads (html,
/// css, eval values) so they pipe cleanly; everything else is JSON.
fn print_data(data: &Value, global: &GlobalOpts) {
    if global.json {
        println!("{data}");
        return;
    }
    if let Some(map) = data.as_object() {
        if map.len() == 1 {
            if let Some(Value::String(s)) = map.values().next() {
                println!("{s}");
                return;
            }
        }
    }
    match serde_json::to_string_pretty(data) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{data}"),
    }
}

fn print_error(err: &DaemonError, global: &GlobalOpts) {
    eprintln!("{}", json!({"error": err.to_string()}));
    if !global.json && matches!(err, DaemonError::DaemonNotRunning) {
        eprintln!("hint: start the daemon with `webctl start`");
    }
}
