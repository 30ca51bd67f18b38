use regex::Regex;
use std::sync::OnceLock;

/// Lightweight record of a recent user message, enough to compute a
/// velocity snapshot without pulling in the full session row type.
#[derive(Debug, Clone)]
pub struct RecentMessage {
    pub author_id: String,
    pub text: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VelocitySnapshot {
    pub is_burst: bool,
    pub is_rapid_dialogue: bool,
    pub is_continuation: bool,
}

fn continuation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)(and\s*$|…\s*$|also,\s*$)").unwrap())
}

/// Computes burst/rapid-dialogue/continuation flags over the trailing
/// `window_ms` (default 120s) of session history plus the message that
/// just arrived.
pub fn snapshot(history: &[RecentMessage], incoming_text: &str, now_ms: i64, window_ms: i64) -> VelocitySnapshot {
    let recent: Vec<&RecentMessage> = history
        .iter()
        .filter(|m| now_ms - m.timestamp_ms <= window_ms)
        .collect();

    let count = recent.len() + 1;
    let unique_authors: std::collections::HashSet<&str> =
        recent.iter().map(|m| m.author_id.as_str()).collect();

    let mut gaps_ms = Vec::new();
    let mut timestamps: Vec<i64> = recent.iter().map(|m| m.timestamp_ms).collect();
    timestamps.push(now_ms);
    timestamps.sort_unstable();
    for pair in timestamps.windows(2) {
        gaps_ms.push(pair[1] - pair[0]);
    }
    let avg_gap_ms = if gaps_ms.is_empty() {
        i64::MAX
    } else {
        gaps_ms.iter().sum::<i64>() / gaps_ms.len() as i64
    };

    let is_burst = count >= 3 && avg_gap_ms < 20_000;
    let is_rapid_dialogue = unique_authors.len() >= 2 && avg_gap_ms < 15_000;
    let is_continuation = continuation_pattern().is_match(incoming_text.trim_end());

    VelocitySnapshot {
        is_burst,
        is_rapid_dialogue,
        is_continuation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(author: &str, ts: i64) -> RecentMessage {
        RecentMessage {
            author_id: author.into(),
            text: "hi".into(),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn three_tight_messages_from_one_author_is_burst() {
        let history = vec![msg("a", 0), msg("a", 10_000)];
        let snap = snapshot(&history, "more", 20_000, 120_000);
        assert!(snap.is_burst);
    }

    #[test]
    fn two_authors_with_short_gaps_is_rapid_dialogue() {
        let history = vec![msg("a", 0), msg("b", 5_000)];
        let snap = snapshot(&history, "hey", 10_000, 120_000);
        assert!(snap.is_rapid_dialogue);
    }

    #[test]
    fn trailing_and_triggers_continuation() {
        let snap = snapshot(&[], "so anyway and", 0, 120_000);
        assert!(snap.is_continuation);
    }

    #[test]
    fn sparse_history_is_neither_burst_nor_rapid() {
        let history = vec![msg("a", 0)];
        let snap = snapshot(&history, "hi", 200_000, 120_000);
        assert!(!snap.is_burst);
        assert!(!snap.is_rapid_dialogue);
    }
}
