//! Shared utilities

use tern_agent::{CompactionOutcome, RestartReason};

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Parse a comma-separated budget list.
///
/// Non-numeric and zero items are skipped; the result is sorted and
/// de-duplicated. An empty result yields `default`.
pub fn parse_budgets(s: &str, default: &[u32]) -> Vec<u32> {
    let mut budgets: Vec<u32> = s
        .split(',')
        .filter_map(|item| item.trim().parse::<u32>().ok())
        .filter(|&n| n > 0)
        .collect();
    budgets.sort_unstable();
    budgets.dedup();
    if budgets.is_empty() {
        default.to_vec()
    } else {
        budgets
    }
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Describe a compression outcome in one line
pub fn compaction_outcome_str(outcome: &CompactionOutcome) -> String {
    match outcome {
        CompactionOutcome::Skipped => "nothing to do".to_string(),
        CompactionOutcome::NothingToFold => "no turns to fold".to_string(),
        CompactionOutcome::Trimmed { dropped } => format!("trimmed {} entries", dropped),
        CompactionOutcome::Folded {
            folded,
            summary_updated: true,
        } => format!("folded {} turns into the summary", folded),
        CompactionOutcome::Folded {
            folded,
            summary_updated: false,
        } => format!("dropped {} old turns; summary unchanged", folded),
        CompactionOutcome::Failed { error } => format!("summary failed: {}", error),
        CompactionOutcome::Refreshed { fallback: false } => "summary refreshed".to_string(),
        CompactionOutcome::Refreshed { fallback: true } => {
            "summary extended locally (summarizer gave no text)".to_string()
        }
    }
}

/// One-line notice shown when a streamed answer starts over
pub fn restart_notice(reason: RestartReason, max_output_tokens: u32) -> String {
    match reason {
        RestartReason::Truncated => {
            format!("(answer cut short; retrying with {} tokens)", max_output_tokens)
        }
        RestartReason::Rejected => {
            "(endpoint refused an optional parameter; retrying without it)".to_string()
        }
        RestartReason::Fault => {
            format!("(request failed; retrying with {} tokens)", max_output_tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_parse_budgets_sorts_and_dedups() {
        assert_eq!(parse_budgets("1536, 768,768", &[1]), vec![768, 1536]);
    }

    #[test]
    fn test_parse_budgets_skips_garbage() {
        assert_eq!(parse_budgets("256,abc,,-5,0,512", &[1]), vec![256, 512]);
    }

    #[test]
    fn test_parse_budgets_falls_back_to_default() {
        assert_eq!(parse_budgets("", &[768, 1536]), vec![768, 1536]);
        assert_eq!(parse_budgets("x,y", &[768]), vec![768]);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a\n\n b\tc "), "a b c");
    }

    #[test]
    fn test_compaction_outcome_str() {
        assert_eq!(
            compaction_outcome_str(&CompactionOutcome::Trimmed { dropped: 3 }),
            "trimmed 3 entries"
        );
        assert!(compaction_outcome_str(&CompactionOutcome::Folded {
            folded: 4,
            summary_updated: false
        })
        .contains("summary unchanged"));
        assert_eq!(
            compaction_outcome_str(&CompactionOutcome::Refreshed { fallback: false }),
            "summary refreshed"
        );
    }

    #[test]
    fn test_restart_notice_names_the_cause() {
        assert_eq!(
            restart_notice(RestartReason::Truncated, 1536),
            "(answer cut short; retrying with 1536 tokens)"
        );
        let rejected = restart_notice(RestartReason::Rejected, 768);
        assert!(!rejected.contains("cut short"));
        assert!(!rejected.contains("768"));
    }
}
