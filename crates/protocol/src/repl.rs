//! Interactive REPL text handling: CR framing and prompt stripping.

use regex::Regex;
use std::sync::OnceLock;

/// Trailing-prompt pattern: one or more `newline + ">>>" + whitespace`
/// groups at the end of a chunk, with optional carriage returns.
fn prompt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:(?:\r?\n)+>>>\s*)+$").expect("prompt pattern compiles"))
}

/// Frames `text` for an interactive write.
///
/// The leading CR makes the REPL reprint its prompt before echoing; the
/// trailing CR makes it execute and echo the result.
pub fn frame_interactive(text: &str) -> Vec<u8> {
    format!("\r{text}\r").into_bytes()
}

/// Removes trailing prompt markers from an echoed chunk.
pub fn strip_trailing_prompt(input: &str) -> String {
    prompt_pattern().replace(input, "").into_owned()
}

/// True when a chunk is nothing but the prompt itself (or blank), and so
/// should not surface as interactive data.
pub fn is_bare_prompt(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.is_empty() || trimmed == ">>>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_trailing_prompt() {
        assert_eq!(strip_trailing_prompt("done\n\r\n>>> "), "done");
    }

    #[test]
    fn bare_prompt_strips_to_empty() {
        assert_eq!(strip_trailing_prompt("\r\n>>> "), "");
    }

    #[test]
    fn strips_repeated_prompt_groups() {
        assert_eq!(strip_trailing_prompt("ok\r\n>>> \r\n>>> "), "ok");
    }

    #[test]
    fn keeps_prompt_like_text_mid_chunk() {
        assert_eq!(
            strip_trailing_prompt(">>> print(1)\r\n1\r\n>>> "),
            ">>> print(1)\r\n1"
        );
    }

    #[test]
    fn bare_prompt_detection() {
        assert!(is_bare_prompt(">>> "));
        assert!(is_bare_prompt("  "));
        assert!(!is_bare_prompt("1"));
    }

    #[test]
    fn interactive_framing_wraps_with_carriage_returns() {
        assert_eq!(frame_interactive("print(1)"), b"\rprint(1)\r".to_vec());
    }
}
