//! Onboarding stage graph.

use serde::{Deserialize, Serialize};

/// Lifecycle position of an onboarding record.
///
/// Main path: Captured → ReleaseToKyc → ReleaseToCm → Completed.
/// From ReleaseToCm a record may loop through Retry or end in Failed;
/// Failed is left only through an explicit reopen into Retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Captured,
    ReleaseToKyc,
    ReleaseToCm,
    Retry,
    Completed,
    Failed,
}

impl Stage {
    /// All stages, in graph order.
    pub const ALL: [Stage; 6] = [
        Stage::Captured,
        Stage::ReleaseToKyc,
        Stage::ReleaseToCm,
        Stage::Retry,
        Stage::Completed,
        Stage::Failed,
    ];

    /// Check if a transition from `self` to `target` is an edge of the graph.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, target),
            // Forward path
            (Captured, ReleaseToKyc) | (Captured, ReleaseToCm) |
            (ReleaseToKyc, ReleaseToCm) |
            // Internal-only completion of parent records
            (Captured, Completed) | (ReleaseToKyc, Completed) |
            // CM outcomes
            (ReleaseToCm, ReleaseToCm) | (ReleaseToCm, Completed) |
            (ReleaseToCm, Retry) | (ReleaseToCm, Failed) |
            // Retry loop and explicit reopen
            (Retry, ReleaseToCm) | (Failed, Retry)
        )
    }

    /// Whether this stage ends the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stages from which `approve` is permitted.
    pub fn is_approvable(&self) -> bool {
        matches!(self, Self::Captured | Self::ReleaseToKyc)
    }

    /// Stages in which local detail updates are accepted.
    pub fn accepts_updates(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    /// Wire/DB name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "CAPTURED",
            Self::ReleaseToKyc => "RELEASE_TO_KYC",
            Self::ReleaseToCm => "RELEASE_TO_CM",
            Self::Retry => "RETRY",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Default `status` text for a record resting in this stage.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Captured => "CAPTURED",
            Self::ReleaseToKyc => "PENDING_KYC",
            Self::ReleaseToCm => "IN_PROGRESS",
            Self::Retry => "RETRY",
            Self::Completed => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}
