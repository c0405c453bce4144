use std::path::PathBuf;

use super::BrowserError;

/// Find a Chromium-family executable.
///
/// Checks the `WEBCTL_BROWSER` environment variable first, then falls back
/// to well-known per-platform paths.
///
/// # Errors
///
/// Returns `BrowserError::NotFound` if nothing usable is on the system.
pub fn find_browser_executable() -> Result<PathBuf, BrowserError> {
    let env_override = std::env::var("WEBCTL_BROWSER").ok().map(PathBuf::from);
    find_browser_from(env_override.as_deref())
}

/// Testable core of [`find_browser_executable`]: the environment override is
/// a parameter instead of being read from `WEBCTL_BROWSER` directly.
fn find_browser_from(env_override: Option<&std::path::Path>) -> Result<PathBuf, BrowserError> {
    if let Some(p) = env_override {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }

    for candidate in browser_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(BrowserError::NotFound(
        "no Chromium-family browser on this system; set WEBCTL_BROWSER or use --browser-path"
            .into(),
    ))
}

/// Candidate executable paths for the current platform.
fn browser_candidates() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
            PathBuf::from("/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"),
            PathBuf::from("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        let path_dirs: Vec<PathBuf> = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .map(PathBuf::from)
            .collect();

        let names = [
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
            "brave-browser",
            "microsoft-edge",
        ];

        let mut candidates = Vec::new();
        for name in names {
            for dir in &path_dirs {
                candidates.push(dir.join(name));
            }
        }
        candidates
    }

    #[cfg(target_os = "windows")]
    {
        let program_files = std::env::var("ProgramFiles").unwrap_or_default();
        let program_files_x86 = std::env::var("ProgramFiles(x86)").unwrap_or_default();
        vec![
            PathBuf::from(&program_files).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&program_files_x86).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&program_files).join("Microsoft/Edge/Application/msedge.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_is_not_empty() {
        assert!(!browser_candidates().is_empty());
    }

    #[test]
    fn override_existing_file_wins() {
        let exe = std::env::current_exe().unwrap();
        let result = find_browser_from(Some(&exe));
        assert_eq!(result.unwrap(), exe);
    }

    #[test]
    fn override_nonexistent_is_skipped() {
        let fake = std::path::Path::new("/nonexistent/webctl-test-browser");
        if let Ok(path) = find_browser_from(Some(fake)) {
            assert_ne!(path.as_path(), fake);
        }
    }
}
