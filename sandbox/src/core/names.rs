//! File naming rules for the sandbox directories.
//!
//! Names are compatibility-significant: viewers and older tooling locate logs,
//! tasks and request descriptors by these patterns.

use std::sync::LazyLock;

use regex::Regex;

/// Filename prefix of disposable tasks in the pending directory.
pub const TASK_PREFIX: &str = "autotask_";
/// Filename suffix of pending request descriptors.
pub const DESCRIPTOR_SUFFIX: &str = ".request.json";

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^autotask_(\d+)(\.[^.]+)$").expect("task regex is valid"));
static LOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{8}_\d{6}_[0-9a-z]+\.json$").expect("log regex is valid")
});

/// Reduce a user-supplied name to a bare file name carrying `suffix`.
///
/// Every directory component is stripped (both `/` and `\` separators), so the
/// result can never escape the directory it is joined to. Returns `None` when
/// nothing usable remains.
pub fn sanitize_script_name(name: &str, suffix: &str) -> Option<String> {
    let base = name
        .rsplit(|ch| ch == '/' || ch == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." || base == suffix {
        return None;
    }
    if base.ends_with(suffix) {
        Some(base.to_string())
    } else {
        Some(format!("{base}{suffix}"))
    }
}

/// `logs/` record name: compact UTC timestamp plus a short random id.
pub fn log_file_name(timestamp: &str, short_id: &str) -> String {
    format!("{timestamp}_{short_id}.json")
}

/// Pending code file for a submitted request.
pub fn request_code_file_name(timestamp: &str, short_id: &str, sanitized_name: &str) -> String {
    format!("{timestamp}_{short_id}_{sanitized_name}")
}

/// Descriptor sitting next to a request code file.
pub fn descriptor_file_name(code_file_name: &str) -> String {
    format!("{code_file_name}{DESCRIPTOR_SUFFIX}")
}

/// Disposable task file derived from an epoch-millisecond identifier.
pub fn task_file_name(epoch_ms: u128, suffix: &str) -> String {
    format!("{TASK_PREFIX}{epoch_ms}{suffix}")
}

/// Epoch-millisecond identifier of a disposable task file, if `file_name` is one.
pub fn parse_task_file_name(file_name: &str, suffix: &str) -> Option<u128> {
    let caps = TASK_RE.captures(file_name)?;
    if caps.get(2)?.as_str() != suffix {
        return None;
    }
    caps.get(1)?.as_str().parse().ok()
}

pub fn is_descriptor_file(file_name: &str) -> bool {
    file_name.len() > DESCRIPTOR_SUFFIX.len() && file_name.ends_with(DESCRIPTOR_SUFFIX)
}

pub fn is_log_file(file_name: &str) -> bool {
    LOG_RE.is_match(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_adds_suffix() {
        assert_eq!(
            sanitize_script_name("../../etc/passwd", ".py").as_deref(),
            Some("passwd.py")
        );
        assert_eq!(
            sanitize_script_name("C:\\tools\\hello.py", ".py").as_deref(),
            Some("hello.py")
        );
        assert_eq!(sanitize_script_name("hello", ".py").as_deref(), Some("hello.py"));
        assert_eq!(
            sanitize_script_name("hello.py", ".py").as_deref(),
            Some("hello.py")
        );
    }

    #[test]
    fn sanitize_rejects_empty_names() {
        assert_eq!(sanitize_script_name("", ".py"), None);
        assert_eq!(sanitize_script_name("dir/", ".py"), None);
        assert_eq!(sanitize_script_name("..", ".py"), None);
        assert_eq!(sanitize_script_name(".py", ".py"), None);
    }

    #[test]
    fn task_names_round_trip_through_parser() {
        let name = task_file_name(1_700_000_000_123, ".py");
        assert_eq!(name, "autotask_1700000000123.py");
        assert_eq!(parse_task_file_name(&name, ".py"), Some(1_700_000_000_123));
        assert_eq!(parse_task_file_name(&name, ".sh"), None);
        assert_eq!(parse_task_file_name("autotask_x.py", ".py"), None);
        assert_eq!(parse_task_file_name("20260101_000000_ab12cd_x.py", ".py"), None);
    }

    #[test]
    fn descriptor_and_log_names_are_recognised() {
        let code = request_code_file_name("20260101_120000", "ab12cd", "tool.py");
        assert_eq!(code, "20260101_120000_ab12cd_tool.py");
        let descriptor = descriptor_file_name(&code);
        assert!(is_descriptor_file(&descriptor));
        assert!(!is_descriptor_file(&code));
        assert!(!is_descriptor_file(".request.json"));

        assert!(is_log_file(&log_file_name("20260101_120000", "ab12cd")));
        assert!(!is_log_file("notes.json"));
    }
}
