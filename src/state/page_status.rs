/// Page status definitions for tracking crawl progress within one job
use std::fmt;

/// Represents the current status of a page within its crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageStatus {
    // ===== Active States =====
    /// Page is tracked and waiting to be crawled
    Queued,

    /// Page is being fetched and extracted by a worker
    Processing,

    // ===== Terminal States =====
    /// Page was fetched and its products were recorded
    Succeeded,

    /// Fetch or extraction failed; content is retained for diagnosis
    Failed,

    /// Page was deliberately not fetched (e.g. disallowed by robots.txt)
    Skipped,
}

impl PageStatus {
    /// Returns true if this is a terminal status (no further processing)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the page counts as an attempted crawl
    pub fn is_attempted(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Checks whether moving from this status to `next` is a legal transition
    pub fn can_transition_to(&self, next: PageStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Processing | Self::Skipped),
            // Processing -> Queued only happens when a crashed worker's page is recovered
            Self::Processing => matches!(
                next,
                Self::Succeeded | Self::Failed | Self::Skipped | Self::Queued
            ),
            Self::Succeeded | Self::Failed | Self::Skipped => false,
        }
    }

    /// Converts the page status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a page status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all possible page statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Processing,
            Self::Succeeded,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
