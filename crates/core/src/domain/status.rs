// Batch and Exit Status

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or step execution.
///
/// Variants are declared in ascending severity; aggregating several statuses
/// (e.g. the steps of a job) keeps the most severe one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Completed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Unknown,
}

impl BatchStatus {
    /// STARTING, STARTED and STOPPING executions still own their instance
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Unknown)
    }

    /// The more severe of the two statuses
    pub fn max(self, other: BatchStatus) -> BatchStatus {
        std::cmp::max(self, other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a persisted status; unrecognised values map to UNKNOWN
    pub fn parse(s: &str) -> BatchStatus {
        match s {
            "COMPLETED" => BatchStatus::Completed,
            "STARTING" => BatchStatus::Starting,
            "STARTED" => BatchStatus::Started,
            "STOPPING" => BatchStatus::Stopping,
            "STOPPED" => BatchStatus::Stopped,
            "FAILED" => BatchStatus::Failed,
            _ => BatchStatus::Unknown,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code + human readable description of how an execution finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const STOPPED: &'static str = "STOPPED";
    pub const FAILED: &'static str = "FAILED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    fn severity(code: &str) -> u8 {
        match code {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combine two statuses: the more severe exit code wins, descriptions are
    /// concatenated.
    pub fn and(self, other: ExitStatus) -> ExitStatus {
        let (mut winner, loser) = if Self::severity(&other.exit_code)
            > Self::severity(&self.exit_code)
        {
            (other, self)
        } else {
            (self, other)
        };
        if !loser.exit_description.is_empty() {
            if winner.exit_description.is_empty() {
                winner.exit_description = loser.exit_description;
            } else if winner.exit_description != loser.exit_description {
                winner.exit_description =
                    format!("{}; {}", winner.exit_description, loser.exit_description);
            }
        }
        winner
    }

    /// Truncate the description to `max_len` characters (applied on write)
    pub fn truncated(&self, max_len: usize) -> ExitStatus {
        if self.exit_description.chars().count() <= max_len {
            return self.clone();
        }
        ExitStatus {
            exit_code: self.exit_code.clone(),
            exit_description: self.exit_description.chars().take(max_len).collect(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl From<BatchStatus> for ExitStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => ExitStatus::completed(),
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping => {
                ExitStatus::executing()
            }
            BatchStatus::Stopped => ExitStatus::stopped(),
            BatchStatus::Failed => ExitStatus::failed(),
            BatchStatus::Unknown => ExitStatus::unknown(),
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity_aggregation() {
        assert_eq!(BatchStatus::Completed.max(BatchStatus::Failed), BatchStatus::Failed);
        assert_eq!(BatchStatus::Stopped.max(BatchStatus::Completed), BatchStatus::Stopped);
        assert_eq!(BatchStatus::Failed.max(BatchStatus::Unknown), BatchStatus::Unknown);
    }

    #[test]
    fn test_running_statuses() {
        assert!(BatchStatus::Starting.is_running());
        assert!(BatchStatus::Stopping.is_running());
        assert!(!BatchStatus::Completed.is_running());
        assert!(!BatchStatus::Unknown.is_running());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BatchStatus::Completed,
            BatchStatus::Started,
            BatchStatus::Stopped,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), status);
        }
        assert_eq!(BatchStatus::parse("garbage"), BatchStatus::Unknown);
    }

    #[test]
    fn test_exit_status_and_keeps_most_severe() {
        let combined = ExitStatus::completed()
            .and(ExitStatus::failed().with_description("boom"));
        assert_eq!(combined.exit_code, ExitStatus::FAILED);
        assert_eq!(combined.exit_description, "boom");

        let combined = ExitStatus::stopped().and(ExitStatus::completed());
        assert_eq!(combined.exit_code, ExitStatus::STOPPED);
    }

    #[test]
    fn test_truncate_description() {
        let status = ExitStatus::failed().with_description("x".repeat(10));
        assert_eq!(status.truncated(4).exit_description, "xxxx");
        assert_eq!(status.truncated(100).exit_description.len(), 10);
    }
}
