/// Crawl job status definitions
use std::fmt;

/// Represents the lifecycle status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Created by an external request, waiting for a worker
    Queued,

    /// Claimed by a worker (or orphaned and waiting to be reclaimed)
    Running,

    /// Halted by an admin; resumable
    Paused,

    Succeeded,

    Failed,

    /// Stopped by an admin; never resumed
    Canceled,
}

impl JobStatus {
    /// Returns true for statuses a job never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Checks whether moving from this status to `next` is a legal transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Canceled),
            Self::Running => matches!(
                next,
                Self::Running | Self::Paused | Self::Succeeded | Self::Failed | Self::Canceled
            ),
            Self::Paused => matches!(next, Self::Running | Self::Canceled),
            Self::Succeeded | Self::Failed | Self::Canceled => false,
        }
    }

    /// Converts the job status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a job status from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns all possible job statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Running,
            Self::Paused,
            Self::Succeeded,
            Self::Failed,
            Self::Canceled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
