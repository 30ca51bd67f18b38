use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct SlopCheck {
    pub is_slop: bool,
    pub violations: Vec<String>,
}

const ASSISTANTY_PHRASES: &[&str] = &[
    "i'd be happy to",
    "i'd be happy to help",
    "as an ai",
    "i am an ai",
    "certainly!",
    "of course!",
    "i hope this helps",
    "let me know if you have any other questions",
    "is there anything else",
];

fn emoji_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            "[",
            "\u{1F300}-\u{1FAFF}",
            "\u{2600}-\u{27BF}",
            "]"
        ))
        .unwrap()
    })
}

/// Flags assistant-y phrasing, em-dash overuse, stray emoji in prose, and
/// length caps. Mirrors `postDraftSlopCheck`.
pub fn post_draft_slop_check(draft_text: &str, is_group: bool, group_max_chars: usize, dm_max_chars: usize) -> SlopCheck {
    let mut violations = Vec::new();
    let lower = draft_text.to_lowercase();

    for phrase in ASSISTANTY_PHRASES {
        if lower.contains(phrase) {
            violations.push(format!("assistant_phrasing:{phrase}"));
        }
    }

    let dash_count = draft_text.matches("--").count() + draft_text.matches('\u{2014}').count();
    if dash_count >= 3 {
        violations.push("em_dash_overuse".to_string());
    }

    if emoji_pattern().is_match(draft_text) {
        violations.push("emoji_in_prose".to_string());
    }

    let max_chars = if is_group { group_max_chars } else { dm_max_chars };
    if draft_text.chars().count() > max_chars {
        violations.push("excessive_length".to_string());
    }

    SlopCheck {
        is_slop: !violations.is_empty(),
        violations,
    }
}

/// Collapses runs of consecutive newlines to a single space, applied to
/// outgoing group text before it leaves the engine.
pub fn collapse_newlines_for_group(text: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\n{2,}").unwrap());
    re.replace_all(text, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_assistant_phrasing() {
        let check = post_draft_slop_check("I'd be happy to help with that!", false, 400, 800);
        assert!(check.is_slop);
        assert!(check.violations.iter().any(|v| v.starts_with("assistant_phrasing")));
    }

    #[test]
    fn flags_em_dash_overuse() {
        let check = post_draft_slop_check("well -- sure -- i guess -- yeah", false, 400, 800);
        assert!(check.violations.contains(&"em_dash_overuse".to_string()));
    }

    #[test]
    fn flags_excessive_length_relative_to_scope() {
        let text = "a".repeat(500);
        let group_check = post_draft_slop_check(&text, true, 400, 800);
        let dm_check = post_draft_slop_check(&text, false, 400, 800);
        assert!(group_check.violations.contains(&"excessive_length".to_string()));
        assert!(!dm_check.violations.contains(&"excessive_length".to_string()));
    }

    #[test]
    fn clean_text_is_not_slop() {
        let check = post_draft_slop_check("yo what's up", false, 400, 800);
        assert!(!check.is_slop);
    }

    #[test]
    fn collapses_blank_lines_for_group_output() {
        let collapsed = collapse_newlines_for_group("line one\n\n\nline two");
        assert_eq!(collapsed, "line one line two");
    }
}
