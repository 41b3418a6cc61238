use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No run has been requested
    #[default]
    Idle,
    /// Entity/direction pair is being checked against the registry
    Validating,
    /// Waiting on the entity lock
    LockAcquiring,
    /// Remote item count in progress
    Counting,
    /// Batches are being processed
    Running,
    /// Completion predicate satisfied, finalizing
    Completing,
    /// Run finished successfully
    Completed,
    /// Run aborted by a fatal error
    Failed,
    /// Run stopped by the cancellation signal
    Cancelled,
}

impl SyncStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Only a running run is in progress
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// States that exist only inside a single `start` invocation
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Validating | Self::LockAcquiring | Self::Counting
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Validating => write!(f, "validating"),
            Self::LockAcquiring => write!(f, "lock_acquiring"),
            Self::Counting => write!(f, "counting"),
            Self::Running => write!(f, "running"),
            Self::Completing => write!(f, "completing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "validating" => Ok(Self::Validating),
            "lock_acquiring" => Ok(Self::LockAcquiring),
            "counting" => Ok(Self::Counting),
            "running" => Ok(Self::Running),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid sync status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(!SyncStatus::Completing.is_terminal());
        assert!(!SyncStatus::Idle.is_terminal());
    }

    #[test]
    fn test_in_progress_only_when_running() {
        assert!(SyncStatus::Running.is_in_progress());
        assert!(!SyncStatus::Counting.is_in_progress());
        assert!(!SyncStatus::Completing.is_in_progress());
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(SyncStatus::LockAcquiring.to_string(), "lock_acquiring");
        assert_eq!(
            "completing".parse::<SyncStatus>().unwrap(),
            SyncStatus::Completing
        );
        assert!("paused".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&SyncStatus::LockAcquiring).unwrap();
        assert_eq!(json, "\"lock_acquiring\"");

        let parsed: SyncStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SyncStatus::LockAcquiring);
    }
}
