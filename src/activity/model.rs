//! Activity records: the append-only audit trail of workflow operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::record::{FieldChange, Stage};

/// Workflow operation an activity entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Submit,
    ReleaseToKyc,
    Approve,
    Update,
    Retry,
    Reopen,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::ReleaseToKyc => "release_to_kyc",
            Self::Approve => "approve",
            Self::Update => "update",
            Self::Retry => "retry",
            Self::Reopen => "reopen",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(Self::Submit),
            "release_to_kyc" => Ok(Self::ReleaseToKyc),
            "approve" => Ok(Self::Approve),
            "update" => Ok(Self::Update),
            "retry" => Ok(Self::Retry),
            "reopen" => Ok(Self::Reopen),
            other => Err(format!("unknown activity action: {other}")),
        }
    }
}

/// What an operation did to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityOutcome {
    /// Record captured.
    Created { stage: Stage },
    /// Stage moved (or stayed, for CM's in-progress answer).
    Transitioned {
        from: Stage,
        to: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Details changed; lists exactly the changed fields.
    Updated { changes: Vec<FieldChange> },
    /// CM refused or could not take a detail update; nothing local changed
    /// except the mirror.
    UpdateDeclined { retryable: bool, message: String },
    /// CM answered but the resulting stage change could not be stored. The
    /// record stays claimed in `from` until it is reopened.
    OutcomeNotStored {
        from: Stage,
        to: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        party_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        error: String,
    },
    /// The operation was refused before it changed anything.
    Aborted { error: String },
}

impl ActivityOutcome {
    /// Serde tag of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Transitioned { .. } => "transitioned",
            Self::Updated { .. } => "updated",
            Self::UpdateDeclined { .. } => "update_declined",
            Self::OutcomeNotStored { .. } => "outcome_not_stored",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// An activity entry waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub record_id: Uuid,
    pub action: ActivityAction,
    pub outcome: ActivityOutcome,
    pub correlation_id: Uuid,
    pub actor: String,
}

impl NewActivity {
    pub fn new(
        record_id: Uuid,
        action: ActivityAction,
        outcome: ActivityOutcome,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            record_id,
            action,
            outcome,
            correlation_id: ctx.correlation_id,
            actor: ctx.actor.clone(),
        }
    }
}

/// A stored activity entry. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub record_id: Uuid,
    /// Position in the record's trail, starting at 1.
    pub sequence: i64,
    pub action: ActivityAction,
    pub outcome: ActivityOutcome,
    pub correlation_id: Uuid,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    /// Materialize a pending entry with the given sequence number.
    pub fn from_new(entry: &NewActivity, sequence: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id: entry.record_id,
            sequence,
            action: entry.action,
            outcome: entry.outcome.clone(),
            correlation_id: entry.correlation_id,
            actor: entry.actor.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_type_tag() {
        let outcome = ActivityOutcome::Transitioned {
            from: Stage::ReleaseToCm,
            to: Stage::Retry,
            message: Some("try again".into()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "transitioned");
        assert_eq!(json["from"], "RELEASE_TO_CM");
        assert_eq!(json["to"], "RETRY");
        assert_eq!(outcome.kind(), "transitioned");

        let back: ActivityOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn action_strings_match_serde() {
        for action in [
            ActivityAction::Submit,
            ActivityAction::ReleaseToKyc,
            ActivityAction::Approve,
            ActivityAction::Update,
            ActivityAction::Retry,
            ActivityAction::Reopen,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.as_str());
            assert_eq!(action.as_str().parse::<ActivityAction>().unwrap(), action);
        }
    }

    #[test]
    fn new_activity_takes_context() {
        let ctx = RequestContext::new("ops@acme.test");
        let record_id = Uuid::new_v4();
        let entry = NewActivity::new(
            record_id,
            ActivityAction::Approve,
            ActivityOutcome::Aborted {
                error: "stage conflict".into(),
            },
            &ctx,
        );
        assert_eq!(entry.actor, "ops@acme.test");
        assert_eq!(entry.correlation_id, ctx.correlation_id);

        let stored = ActivityRecord::from_new(&entry, 3);
        assert_eq!(stored.sequence, 3);
        assert_eq!(stored.record_id, record_id);
    }
}
