//! Small helpers shared by the clients and handlers.

use serde_json::Value;

/// Parse JSON, returning `None` on malformed input.
pub fn safe_json_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Replace anything outside `[A-Za-z0-9.-]` with `_`, collapse runs of `_`
/// and drop one leading and one trailing `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out = out.strip_prefix('_').unwrap_or(&out);
    out.strip_suffix('_').unwrap_or(out).to_string()
}

/// Human-readable byte count, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut exp = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && exp < UNITS.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exp])
}

/// Truncate to `max` characters, appending `...` when shortened.
pub fn truncate_string(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("bank file (1).csv"), "bank_file_1_.csv");
        assert_eq!(sanitize_file_name("__bank file (1).csv"), "bank_file_1_.csv");
        assert_eq!(sanitize_file_name("(draft) report_"), "draft_report");
        assert_eq!(sanitize_file_name("ok-name_2.txt"), "ok-name_2.txt");
        assert_eq!(sanitize_file_name("___"), "");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50 MB");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn test_safe_json_parse() {
        assert_eq!(safe_json_parse(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(safe_json_parse("{broken").is_none());
    }
}
