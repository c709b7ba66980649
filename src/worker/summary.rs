//! Job error summaries
//!
//! A failed job carries one message in its `error_message` column. It is built from the
//! distinct errors of its failed pages and kept short enough for admin listings.

use std::fmt::Display;

/// Longest single page error kept in a summary (characters)
pub const MAX_ERROR_LENGTH: usize = 200;

/// Longest job error message (characters)
pub const MAX_SUMMARY_LENGTH: usize = 1000;

/// Number of distinct page errors quoted in a summary
pub const MAX_DISTINCT_ERRORS: usize = 5;

/// Message for a job that finished without attempting any page
pub const NO_PAGES_CRAWLED: &str = "No pages could be crawled";

const ELLIPSIS: &str = "...";

/// Cuts a message to at most `max_chars` characters, marking the cut with "..."
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str(&ELLIPSIS[..max_chars.min(ELLIPSIS.len())]);
    truncated
}

/// Truncates page errors and keeps the first five that are still distinct
///
/// Errors that only differ past the truncation point count as one.
pub fn distinct_errors(errors: &[String]) -> Vec<String> {
    let mut quoted: Vec<String> = Vec::new();

    for error in errors.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if quoted.len() == MAX_DISTINCT_ERRORS {
            break;
        }
        let error = truncate_message(error, MAX_ERROR_LENGTH);
        if !quoted.contains(&error) {
            quoted.push(error);
        }
    }

    quoted
}

/// Summary for a job whose every attempted page failed
///
/// Quotes up to five distinct page errors, each truncated, joined with " | ".
///
/// # Arguments
///
/// * `failed_pages` - Number of Failed pages of the job
/// * `errors` - Distinct page errors, oldest first
pub fn build_failure_summary(failed_pages: u64, errors: &[String]) -> String {
    let quoted = distinct_errors(errors);

    let summary = if quoted.is_empty() {
        format!("All {} pages failed", failed_pages)
    } else {
        format!("All {} pages failed: {}", failed_pages, quoted.join(" | "))
    };

    truncate_message(&summary, MAX_SUMMARY_LENGTH)
}

/// Summary for a job aborted by a critical error
pub fn critical_summary(url: &str, error: impl Display) -> String {
    truncate_message(
        &format!("Critical error on {}: {}", url, error),
        MAX_SUMMARY_LENGTH,
    )
}
