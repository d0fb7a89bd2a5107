// ============================================================================
// Log Sanitization
// ============================================================================
//
// Table names, WHERE fragments, item codes and file names come from users or
// from the ERP. They pass through `sanitize_for_log` before being logged so
// they cannot forge log lines or smuggle terminal control sequences.
//
// ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for logged user input
const MAX_LOG_LENGTH: usize = 200;

static ANSI_ESCAPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());

/// Strips ANSI escapes, flattens newlines and tabs to spaces, drops other
/// control characters and truncates to `MAX_LOG_LENGTH` characters.
///
/// ```
/// use stocktake::utils::log_sanitizer::sanitize_for_log;
///
/// assert_eq!(sanitize_for_log("OITM\nINFO: fake"), "OITM INFO: fake");
/// assert_eq!(sanitize_for_log("SKU\x1b[31m-1\x1b[0m"), "SKU-1");
/// ```
pub fn sanitize_for_log(input: &str) -> String {
    let no_ansi = ANSI_ESCAPE_REGEX.replace_all(input, "");

    let cleaned: String = no_ansi
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    if cleaned.chars().count() > MAX_LOG_LENGTH {
        let truncated: String = cleaned.chars().take(MAX_LOG_LENGTH).collect();
        format!("{}...", truncated)
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_removes_newlines() {
        let result = sanitize_for_log("OITW\nINFO: Fake log entry");
        assert_eq!(result, "OITW INFO: Fake log entry");
    }

    #[test]
    fn test_sanitize_removes_ansi_and_control_chars() {
        assert_eq!(sanitize_for_log("test\x1b[31mred\x1b[0m"), "testred");
        assert_eq!(sanitize_for_log("SKU\x00\x01-1"), "SKU-1");
    }

    #[test]
    fn test_sanitize_replaces_tabs() {
        assert_eq!(sanitize_for_log("a\tb"), "a b");
    }

    #[test]
    fn test_sanitize_truncates_long_strings() {
        let result = sanitize_for_log(&"a".repeat(300));
        assert_eq!(result.len(), MAX_LOG_LENGTH + 3);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let result = sanitize_for_log(&"品".repeat(250));
        assert!(result.ends_with("..."));
        assert_eq!(result.chars().count(), MAX_LOG_LENGTH + 3);
    }
}
