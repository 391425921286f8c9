//! Lifecycle status of a sync job.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sync job status.
///
/// Transitions only move forward: `queued -> running -> completed | failed`,
/// and `queued | running -> cancelled`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[sea_orm(string_value = "queued")]
    #[default]
    Queued,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SyncStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Staying in `running` is allowed (progress writes); every other
    /// self-transition is not.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Queued => "queued",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_queued() {
        assert_eq!(SyncStatus::default(), SyncStatus::Queued);
    }

    #[test]
    fn display_outputs_expected_strings() {
        assert_eq!(SyncStatus::Queued.to_string(), "queued");
        assert_eq!(SyncStatus::Running.to_string(), "running");
        assert_eq!(SyncStatus::Completed.to_string(), "completed");
        assert_eq!(SyncStatus::Failed.to_string(), "failed");
        assert_eq!(SyncStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn transitions_only_move_forward() {
        use SyncStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(!SyncStatus::Queued.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
    }
}
