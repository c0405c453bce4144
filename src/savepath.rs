//! Save-target path resolution.
//!
//! Commands with a `save` form write under `/tmp/webctl-<kind>/` unless the
//! user supplies a path. A trailing `/` marks the path as a directory to
//! auto-name into, independent of what exists on disk; anything else is
//! taken as the exact file to write.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolve the file to write for a save command.
///
/// `kind` names the per-kind temp directory (`html`, `screenshot`, ...),
/// `ident` seeds the auto-generated name (page title or selector), `ext` is
/// the file extension without the dot.
#[must_use]
pub fn resolve(user_path: Option<&str>, kind: &str, ident: &str, ext: &str) -> PathBuf {
    match user_path {
        Some(p) if p.ends_with('/') => PathBuf::from(p).join(auto_name(ident, ext)),
        Some(p) => PathBuf::from(p),
        None => std::env::temp_dir()
            .join(format!("webctl-{kind}"))
            .join(auto_name(ident, ext)),
    }
}

/// `YY-MM-DD-HHMMSS-{slug}.{ext}` from the current wall clock.
#[must_use]
pub fn auto_name(ident: &str, ext: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}-{}.{ext}", format_stamp(secs), slug(ident))
}

/// Reduce a page title or selector to a filename-safe slug: lowercased,
/// anything outside `[a-z0-9-]` replaced by `-`, runs collapsed, edges
/// trimmed. Empty input becomes `page`.
#[must_use]
pub fn slug(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut last_dash = true;
    for c in ident.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "page".to_string()
    } else {
        out
    }
}

/// Civil date/time from epoch seconds (Howard Hinnant's algorithm); avoids
/// a calendar dependency for two timestamp formats.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn civil(secs: u64) -> (i64, u64, u64, u64, u64, u64) {
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let z = days_since_epoch as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    (y, m, d, hours, minutes, seconds)
}

/// Format epoch seconds as `YY-MM-DD-HHMMSS`.
#[must_use]
pub fn format_stamp(secs: u64) -> String {
    let (y, m, d, hours, minutes, seconds) = civil(secs);
    format!("{:02}-{m:02}-{d:02}-{hours:02}{minutes:02}{seconds:02}", y % 100)
}

/// Convert epoch milliseconds (CDP event timestamps) to ISO 8601.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn iso8601_from_epoch_ms(ts_ms: f64) -> String {
    let millis = if ts_ms.is_finite() && ts_ms > 0.0 {
        ts_ms as u64
    } else {
        0
    };
    let (y, m, d, hours, minutes, seconds) = civil(millis / 1000);
    let ms_part = millis % 1000;
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}.{ms_part:03}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_basic() {
        assert_eq!(slug("Example Domain"), "example-domain");
        assert_eq!(slug("#login > input[type=text]"), "login-input-type-text");
        assert_eq!(slug("---"), "page");
        assert_eq!(slug(""), "page");
    }

    #[test]
    fn slug_collapses_runs() {
        assert_eq!(slug("a   b///c"), "a-b-c");
    }

    #[test]
    fn stamp_known_instant() {
        // 2026-03-01 12:30:45 UTC
        assert_eq!(format_stamp(1_772_368_245), "26-03-01-123045");
    }

    #[test]
    fn stamp_epoch() {
        assert_eq!(format_stamp(0), "70-01-01-000000");
    }

    #[test]
    fn iso8601_known_instant() {
        assert_eq!(
            iso8601_from_epoch_ms(1_772_368_245_123.0),
            "2026-03-01T12:30:45.123Z"
        );
    }

    #[test]
    fn iso8601_rejects_garbage() {
        assert_eq!(iso8601_from_epoch_ms(f64::NAN), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso8601_from_epoch_ms(-5.0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn explicit_file_path_is_exact() {
        let p = resolve(Some("/tmp/out.html"), "html", "Title", "html");
        assert_eq!(p, PathBuf::from("/tmp/out.html"));
    }

    #[test]
    fn trailing_slash_means_directory() {
        let p = resolve(Some("/tmp/outdir/"), "html", "My Page", "html");
        assert!(p.starts_with("/tmp/outdir"));
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-my-page.html"), "got {name}");
    }

    #[test]
    fn default_goes_to_kind_tempdir() {
        let p = resolve(None, "screenshot", "Example", "png");
        assert!(p.starts_with(std::env::temp_dir().join("webctl-screenshot")));
        assert!(p.to_string_lossy().ends_with(".png"));
    }
}
