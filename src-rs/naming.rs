//! File names derived from the page title.

use chrono::{DateTime, Utc};

const FALLBACK_NAME: &str = "screenshot";

/// `<sanitized title>_<YYYYMMDD-HHMMSS>.png`, or `screenshot_<ts>.png` when
/// nothing usable is left of the title.
pub fn suggested_file_name(title: &str, max_chars: usize, now: DateTime<Utc>) -> String {
    let base = sanitize_title(title, max_chars);
    format!("{base}_{}.png", timestamp_compact(now))
}

pub fn sanitize_title(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.chars() {
        if ch.is_control() || matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }

    let capped: String = out.chars().take(max_chars).collect();
    let trimmed = capped.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn timestamp_compact(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn strips_illegal_characters_and_collapses_whitespace() {
        assert_eq!(
            sanitize_title("  Report: Q1 <draft>\t|  v2?  ", 100),
            "Report Q1 draft v2"
        );
        assert_eq!(sanitize_title("a/b\\c*d\"e", 100), "abcde");
    }

    #[test]
    fn caps_length_in_characters() {
        let title = "é".repeat(30);
        assert_eq!(sanitize_title(&title, 10).chars().count(), 10);
    }

    #[test]
    fn falls_back_when_nothing_is_left() {
        assert_eq!(sanitize_title("???", 100), "screenshot");
        assert_eq!(sanitize_title("", 100), "screenshot");
        assert_eq!(sanitize_title("...", 100), "screenshot");
    }

    #[test]
    fn appends_timestamp_and_extension() {
        assert_eq!(
            suggested_file_name("Inbox (3)", 100, fixed_now()),
            "Inbox (3)_20240309-140507.png"
        );
        assert_eq!(
            suggested_file_name("", 100, fixed_now()),
            "screenshot_20240309-140507.png"
        );
    }
}
