//! Debounced recursive file watcher driving hot reload.
//!
//! OS notifications arrive on notify's own thread and are bridged into a
//! tokio channel; a debounce task collapses each burst into a single
//! "changed" signal, 300 ms after the last relevant event.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Trailing-edge debounce window.
pub const DEBOUNCE: Duration = Duration::from_millis(300);

/// Directory names never watched, regardless of user patterns.
const IGNORED_DIRS: [&str; 3] = ["node_modules", "vendor", "__pycache__"];

/// Keeps the OS watches registered; dropping it stops the watcher.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Build a glob set from user-supplied ignore patterns.
///
/// Unparseable patterns are skipped with a warning rather than failing the
/// whole serve command.
#[must_use]
pub fn build_ignore_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern, error = %e, "skipping bad ignore pattern"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Whether a changed path should be ignored.
///
/// Rules: any component starting with `.`, the well-known build/dependency
/// directories, and user glob patterns (matched against the path relative
/// to the watch root).
#[must_use]
pub fn is_ignored(path: &Path, root: &Path, ignore: &GlobSet) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);

    for component in relative.components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref()) {
                return true;
            }
        }
    }

    ignore.is_match(relative)
}

/// Watch `root` recursively and send one `()` per settled burst of changes.
///
/// `watch_patterns`, when non-empty, restrict which changed paths count;
/// `ignore_patterns` always exclude. New directories created under the
/// root are picked up by the recursive watch. The returned handle must be
/// kept alive.
///
/// # Errors
///
/// Returns the notify error text if the watch cannot be registered.
pub fn spawn_watcher(
    root: PathBuf,
    watch_patterns: &[String],
    ignore_patterns: &[String],
    on_change: mpsc::Sender<()>,
) -> Result<WatchHandle, String> {
    let watch = build_ignore_set(watch_patterns);
    let ignore = build_ignore_set(ignore_patterns);
    let (raw_tx, raw_rx) = mpsc::channel::<Event>(256);

    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                // Queue full or closed: drop the event, the debouncer only
                // needs to see one per burst anyway.
                let _ = raw_tx.try_send(event);
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| format!("failed to create watcher: {e}"))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| format!("failed to watch {}: {e}", root.display()))?;

    tokio::spawn(debounce_loop(root, watch, ignore, raw_rx, on_change));

    Ok(WatchHandle { _watcher: watcher })
}

fn event_is_relevant(event: &Event, root: &Path, watch: &GlobSet, ignore: &GlobSet) -> bool {
    if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
        return false;
    }
    event.paths.iter().any(|path| {
        if is_ignored(path, root, ignore) {
            return false;
        }
        if watch.is_empty() {
            return true;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        watch.is_match(relative)
    })
}

async fn debounce_loop(
    root: PathBuf,
    watch: GlobSet,
    ignore: GlobSet,
    mut raw_rx: mpsc::Receiver<Event>,
    on_change: mpsc::Sender<()>,
) {
    loop {
        // Wait for the first relevant event of a burst.
        let Some(event) = raw_rx.recv().await else {
            return;
        };
        if !event_is_relevant(&event, &root, &watch, &ignore) {
            continue;
        }

        // Extend the window while relevant events keep arriving.
        loop {
            match tokio::time::timeout(DEBOUNCE, raw_rx.recv()).await {
                Ok(Some(event)) => {
                    if event_is_relevant(&event, &root, &watch, &ignore) {
                        continue;
                    }
                    // Irrelevant event: keep waiting out the current window.
                }
                Ok(None) => return,
                Err(_) => break,
            }
        }

        debug!("file change settled, signalling reload");
        if on_change.send(()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs(patterns: &[&str]) -> GlobSet {
        build_ignore_set(&patterns.iter().map(ToString::to_string).collect::<Vec<_>>())
    }

    #[test]
    fn dotfiles_are_ignored() {
        let root = Path::new("/srv/site");
        let ignore = GlobSet::empty();
        assert!(is_ignored(Path::new("/srv/site/.git/HEAD"), root, &ignore));
        assert!(is_ignored(Path::new("/srv/site/src/.env"), root, &ignore));
        assert!(!is_ignored(Path::new("/srv/site/src/app.js"), root, &ignore));
    }

    #[test]
    fn dependency_dirs_are_ignored() {
        let root = Path::new("/srv/site");
        let ignore = GlobSet::empty();
        assert!(is_ignored(
            Path::new("/srv/site/node_modules/pkg/index.js"),
            root,
            &ignore
        ));
        assert!(is_ignored(
            Path::new("/srv/site/vendor/lib.php"),
            root,
            &ignore
        ));
        assert!(is_ignored(
            Path::new("/srv/site/app/__pycache__/mod.pyc"),
            root,
            &ignore
        ));
    }

    #[test]
    fn user_globs_apply_to_relative_paths() {
        let root = Path::new("/srv/site");
        let ignore = globs(&["*.log", "dist/**"]);
        assert!(is_ignored(Path::new("/srv/site/build.log"), root, &ignore));
        assert!(is_ignored(
            Path::new("/srv/site/dist/bundle.js"),
            root,
            &ignore
        ));
        assert!(!is_ignored(Path::new("/srv/site/index.html"), root, &ignore));
    }

    #[test]
    fn bad_pattern_is_skipped_not_fatal() {
        let ignore = globs(&["[unclosed"]);
        assert!(!ignore.is_match("anything"));
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_signal() {
        let root = PathBuf::from("/srv/site");
        let ignore = GlobSet::empty();
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (change_tx, mut change_rx) = mpsc::channel(8);

        tokio::spawn(debounce_loop(
            root.clone(),
            GlobSet::empty(),
            ignore,
            raw_rx,
            change_tx,
        ));

        let event = Event {
            kind: notify::EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![root.join("app.js")],
            attrs: notify::event::EventAttributes::default(),
        };

        for _ in 0..5 {
            raw_tx.send(event.clone()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // One signal for the whole burst.
        let got = tokio::time::timeout(Duration::from_secs(2), change_rx.recv())
            .await
            .expect("debounced signal");
        assert!(got.is_some());

        let extra = tokio::time::timeout(Duration::from_millis(500), change_rx.recv()).await;
        assert!(extra.is_err(), "expected no second signal");
    }

    #[tokio::test]
    async fn ignored_paths_produce_no_signal() {
        let root = PathBuf::from("/srv/site");
        let ignore = GlobSet::empty();
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (change_tx, mut change_rx) = mpsc::channel(8);

        tokio::spawn(debounce_loop(
            root.clone(),
            GlobSet::empty(),
            ignore,
            raw_rx,
            change_tx,
        ));

        let event = Event {
            kind: notify::EventKind::Create(notify::event::CreateKind::File),
            paths: vec![root.join(".git/index.lock")],
            attrs: notify::event::EventAttributes::default(),
        };
        raw_tx.send(event).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(500), change_rx.recv()).await;
        assert!(got.is_err(), "ignored path should not signal");
    }
}
