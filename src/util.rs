use std::env;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;

pub(crate) fn env_required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    let value = env::var(name).unwrap_or_default();
    if value.trim().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("Missing {name}")).into());
    }
    Ok(value)
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_usize(name: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<usize>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

pub(crate) fn env_f64(name: &str, default: f64) -> Result<f64, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<f64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

/// Pseudo-random ratio in [0, 1) derived from the clock. Good enough for
/// retry jitter; avoids pulling in an RNG crate.
pub(crate) fn jitter_ratio() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// Minimal syntactic check for an email address: one `@`, non-empty local
/// part, dotted domain, no whitespace. Deliverability is the provider's
/// problem; this only rejects strings that cannot be addresses at all.
pub(crate) fn is_valid_email(addr: &str) -> bool {
    let addr = addr.trim();
    if addr.is_empty() || addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}

/// Parse a naive timestamp in the handful of shapes the model produces.
pub(crate) fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Write a JSON value to disk atomically (tmp file + rename) so a crash
/// mid-write never leaves a truncated state file.
pub(crate) fn write_json_atomic(
    path: &Path,
    value: &serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!(
        "{kept}\n\n[Output truncated: {} chars total, showing first {max_chars}.]",
        text.chars().count()
    )
}

// ── Interrupt flag ──────────────────────────────────────────────────────
// A SIGINT during a turn must abort the current planning round cleanly and
// leave the session usable for the next turn, so the handler only flips a
// flag that the planner polls between steps.

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
pub(crate) fn install_interrupt_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigint as usize;
        // No SA_RESTART: a blocked prompt read returns EINTR so the REPL can
        // repaint instead of hanging until the next newline.
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub(crate) fn install_interrupt_handler() {}

/// Read and clear the interrupt flag.
pub(crate) fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("someone@example.com"));
        assert!(is_valid_email("  first.last@sub.example.org "));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user name@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
    }

    #[test]
    fn test_parse_naive_datetime() {
        assert!(parse_naive_datetime("2026-03-01T09:30").is_some());
        assert!(parse_naive_datetime("2026-03-01T09:30:15").is_some());
        assert!(parse_naive_datetime("2026-03-01 09:30").is_some());
        assert!(parse_naive_datetime("tomorrow at nine").is_none());
        assert!(parse_naive_datetime("2026-03-01").is_none());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 100), "short");
        let long = "x".repeat(200);
        let cut = truncate_chars(&long, 50);
        assert!(cut.starts_with(&"x".repeat(50)));
        assert!(cut.contains("Output truncated: 200 chars"));
    }

    #[test]
    fn test_write_json_atomic_roundtrip() {
        let dir = std::env::temp_dir().join("valet_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("util_atomic_{}.json", std::process::id()));
        let value = serde_json::json!({"a": 1, "b": ["x", "y"]});
        write_json_atomic(&path, &value).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, value);
        std::fs::remove_file(&path).ok();
    }
}
