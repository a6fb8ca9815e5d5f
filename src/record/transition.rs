//! Transition functions and the partial-update allowlist.
//!
//! Everything here is pure: a transition is computed from the current stage
//! and a tagged outcome, then turned into a [`PartialUpdate`] that touches
//! only the allowlisted fields. No I/O happens in this module.

use serde::{Deserialize, Serialize};

use crate::classifier::Verdict;

use super::model::{ExternalMirror, OnboardingRecord, PartyType};
use super::stage::Stage;

/// Success flavours CM reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptedStatus {
    /// `P`: accepted, CM still processing.
    InProgress,
    /// `S`: accepted and complete.
    Complete,
}

impl AcceptedStatus {
    /// CM's one-letter status code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InProgress => "P",
            Self::Complete => "S",
        }
    }
}

/// Result of one CM call attempt, as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmOutcome {
    /// CM accepted the request and returned a party id.
    Accepted {
        status: AcceptedStatus,
        party_id: String,
        message: Option<String>,
    },
    /// CM returned a structured business failure, already classified.
    Rejected {
        code: String,
        reason: String,
        message: String,
        verdict: Verdict,
    },
    /// CM could not be reached, timed out or answered with garbage.
    Unreachable {
        reason: String,
        user_message: String,
    },
}

/// A computed stage change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    /// New `status` text.
    pub status: String,
    /// New mirror fields; `None` leaves the stored mirror as is.
    pub external: Option<ExternalMirror>,
    /// Party id reported by CM, if any.
    pub party_id: Option<String>,
}

impl Transition {
    fn plain(from: Stage, to: Stage) -> Self {
        Self {
            from,
            to,
            status: to.status_label().to_string(),
            external: None,
            party_id: None,
        }
    }

    /// User-facing message of this transition, if it carries one.
    pub fn status_msg(&self) -> Option<&str> {
        self.external.as_ref().and_then(|m| m.status_msg.as_deref())
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Cannot transition from {from} to {to}")]
    Invalid { from: Stage, to: Stage },

    #[error("Parent records do not go to CM")]
    ParentExempt,

    #[error("Only parent records complete without CM")]
    NotParent,
}

fn edge(from: Stage, to: Stage) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError::Invalid { from, to })
    }
}

/// Move a record into RELEASE_TO_CM before dispatching a CM call.
///
/// The claim clears the mirror, so a RELEASE_TO_CM record with an empty
/// mirror is one whose CM answer was never stored.
pub fn claim(current: Stage, party_type: PartyType) -> Result<Transition, TransitionError> {
    if party_type.is_parent() {
        return Err(TransitionError::ParentExempt);
    }
    if current == Stage::ReleaseToCm {
        // Self-edge is reserved for CM's P outcome, not for a second dispatch.
        return Err(TransitionError::Invalid {
            from: current,
            to: Stage::ReleaseToCm,
        });
    }
    edge(current, Stage::ReleaseToCm)?;
    Ok(Transition {
        external: Some(ExternalMirror::default()),
        ..Transition::plain(current, Stage::ReleaseToCm)
    })
}

/// Internal-only completion path for parent records.
pub fn complete_internally(
    current: Stage,
    party_type: PartyType,
) -> Result<Transition, TransitionError> {
    if !party_type.is_parent() {
        return Err(TransitionError::NotParent);
    }
    edge(current, Stage::Completed)?;
    Ok(Transition::plain(current, Stage::Completed))
}

/// CAPTURED → RELEASE_TO_KYC.
pub fn release_to_kyc(current: Stage) -> Result<Transition, TransitionError> {
    edge(current, Stage::ReleaseToKyc)?;
    Ok(Transition::plain(current, Stage::ReleaseToKyc))
}

/// FAILED → RETRY, the explicit way out of the failed state.
pub fn reopen(current: Stage) -> Result<Transition, TransitionError> {
    if current != Stage::Failed {
        return Err(TransitionError::Invalid {
            from: current,
            to: Stage::Retry,
        });
    }
    Ok(Transition::plain(current, Stage::Retry))
}

/// RELEASE_TO_CM → RETRY for a claim whose CM answer was never stored.
///
/// `held` is the stored mirror and must still be empty; `note` replaces it.
pub fn release_unanswered(
    current: Stage,
    held: &ExternalMirror,
    note: ExternalMirror,
) -> Result<Transition, TransitionError> {
    if current != Stage::ReleaseToCm || !held.is_empty() {
        return Err(TransitionError::Invalid {
            from: current,
            to: Stage::Retry,
        });
    }
    Ok(Transition {
        external: Some(note),
        ..Transition::plain(current, Stage::Retry)
    })
}

/// Apply a CM outcome to a record sitting in RELEASE_TO_CM.
///
/// Deterministic: identical inputs always yield identical transitions.
pub fn apply(current: Stage, outcome: &CmOutcome) -> Result<Transition, TransitionError> {
    let to = match outcome {
        CmOutcome::Accepted {
            status: AcceptedStatus::InProgress,
            ..
        } => Stage::ReleaseToCm,
        CmOutcome::Accepted {
            status: AcceptedStatus::Complete,
            ..
        } => Stage::Completed,
        CmOutcome::Rejected { verdict, .. } if verdict.retryable => Stage::Retry,
        CmOutcome::Rejected { .. } => Stage::Failed,
        CmOutcome::Unreachable { .. } => Stage::Retry,
    };
    if current != Stage::ReleaseToCm {
        return Err(TransitionError::Invalid { from: current, to });
    }
    edge(current, to)?;

    let party_id = match outcome {
        CmOutcome::Accepted { party_id, .. } => Some(party_id.clone()),
        _ => None,
    };

    Ok(Transition {
        from: current,
        to,
        status: to.status_label().to_string(),
        external: Some(mirror_for(outcome)),
        party_id,
    })
}

/// Mirror fields recorded for an outcome.
pub fn mirror_for(outcome: &CmOutcome) -> ExternalMirror {
    match outcome {
        CmOutcome::Accepted {
            status, message, ..
        } => ExternalMirror {
            status: Some(status.code().to_string()),
            status_code: None,
            error_reason: None,
            status_msg: message.clone(),
        },
        CmOutcome::Rejected {
            code,
            reason,
            verdict,
            ..
        } => ExternalMirror {
            status: Some("F".to_string()),
            status_code: Some(code.clone()),
            error_reason: Some(reason.clone()),
            status_msg: Some(verdict.user_message.clone()),
        },
        CmOutcome::Unreachable {
            reason,
            user_message,
        } => ExternalMirror {
            status: None,
            status_code: None,
            error_reason: Some(reason.clone()),
            status_msg: Some(user_message.clone()),
        },
    }
}

/// Field names a [`PartialUpdate`] may write.
pub const PARTIAL_UPDATE_ALLOWLIST: [&str; 7] = [
    "stage",
    "status",
    "external_party_id",
    "external_status",
    "external_status_code",
    "external_error_reason",
    "external_status_msg",
];

/// A record mutation restricted to [`PARTIAL_UPDATE_ALLOWLIST`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUpdate {
    pub stage: Stage,
    pub status: String,
    /// Set only when the record has no party id yet.
    pub external_party_id: Option<String>,
    /// `None` keeps the stored mirror.
    pub external: Option<ExternalMirror>,
}

impl PartialUpdate {
    /// Build the update for `transition` against the record it applies to.
    ///
    /// An existing party id is never replaced.
    pub fn for_transition(record: &OnboardingRecord, transition: &Transition) -> Self {
        let external_party_id = match (&record.external_party_id, &transition.party_id) {
            (None, Some(new_id)) => Some(new_id.clone()),
            _ => None,
        };
        Self {
            stage: transition.to,
            status: transition.status.clone(),
            external_party_id,
            external: transition.external.clone(),
        }
    }

    /// Mirror-only update: stage and status stay as they are.
    pub fn mirror_only(record: &OnboardingRecord, mirror: ExternalMirror) -> Self {
        Self {
            stage: record.stage,
            status: record.status.clone(),
            external_party_id: None,
            external: Some(mirror),
        }
    }

    /// Return a copy of `record` with only the allowlisted fields replaced.
    pub fn apply_to(&self, record: &OnboardingRecord) -> OnboardingRecord {
        let mut next = record.clone();
        next.stage = self.stage;
        next.status = self.status.clone();
        if next.external_party_id.is_none() {
            if let Some(id) = &self.external_party_id {
                next.external_party_id = Some(id.clone());
            }
        }
        if let Some(mirror) = &self.external {
            next.external = mirror.clone();
        }
        next
    }

    /// Whether this update assigns a party id the record did not have.
    pub fn assigns_party_id(&self) -> bool {
        self.external_party_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::model::EntityKind;

    fn verdict(retryable: bool) -> Verdict {
        Verdict {
            retryable,
            user_message: if retryable { "retry later" } else { "rejected" }.to_string(),
        }
    }

    fn accepted(status: AcceptedStatus, id: &str) -> CmOutcome {
        CmOutcome::Accepted {
            status,
            party_id: id.to_string(),
            message: None,
        }
    }

    #[test]
    fn complete_moves_to_completed_with_party_id() {
        let t = apply(Stage::ReleaseToCm, &accepted(AcceptedStatus::Complete, "BP123")).unwrap();
        assert_eq!(t.to, Stage::Completed);
        assert_eq!(t.status, "SUCCESS");
        assert_eq!(t.party_id.as_deref(), Some("BP123"));
        assert_eq!(t.external.unwrap().status.as_deref(), Some("S"));
    }

    #[test]
    fn in_progress_stays_in_release_to_cm() {
        let t = apply(Stage::ReleaseToCm, &accepted(AcceptedStatus::InProgress, "BP9")).unwrap();
        assert_eq!(t.to, Stage::ReleaseToCm);
        assert_eq!(t.party_id.as_deref(), Some("BP9"));
    }

    #[test]
    fn retryable_rejection_goes_to_retry() {
        let outcome = CmOutcome::Rejected {
            code: "CMONB1".into(),
            reason: "duplicate".into(),
            message: "Duplicate request".into(),
            verdict: verdict(true),
        };
        let t = apply(Stage::ReleaseToCm, &outcome).unwrap();
        assert_eq!(t.to, Stage::Retry);
        let mirror = t.external.unwrap();
        assert_eq!(mirror.status_code.as_deref(), Some("CMONB1"));
        assert_eq!(mirror.error_reason.as_deref(), Some("duplicate"));
        assert_eq!(mirror.status_msg.as_deref(), Some("retry later"));
        assert!(t.party_id.is_none());
    }

    #[test]
    fn terminal_rejection_goes_to_failed() {
        let outcome = CmOutcome::Rejected {
            code: "CMVAL9".into(),
            reason: "bad tax id".into(),
            message: "Invalid".into(),
            verdict: verdict(false),
        };
        assert_eq!(apply(Stage::ReleaseToCm, &outcome).unwrap().to, Stage::Failed);
    }

    #[test]
    fn unreachable_always_retries() {
        let outcome = CmOutcome::Unreachable {
            reason: "CM connectivity failure: timed out".into(),
            user_message: "try again".into(),
        };
        let t = apply(Stage::ReleaseToCm, &outcome).unwrap();
        assert_eq!(t.to, Stage::Retry);
        let mirror = t.external.unwrap();
        assert!(mirror.status.is_none());
        assert_eq!(mirror.status_msg.as_deref(), Some("try again"));
    }

    #[test]
    fn apply_outside_release_to_cm_is_refused() {
        let err = apply(Stage::Captured, &accepted(AcceptedStatus::Complete, "BP1")).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: Stage::Captured,
                to: Stage::Completed
            }
        );
        assert!(apply(Stage::Completed, &accepted(AcceptedStatus::Complete, "BP1")).is_err());
    }

    #[test]
    fn claim_guards() {
        assert_eq!(
            claim(Stage::Captured, PartyType::Parent).unwrap_err(),
            TransitionError::ParentExempt
        );
        assert_eq!(claim(Stage::Captured, PartyType::Child).unwrap().to, Stage::ReleaseToCm);
        assert_eq!(claim(Stage::Retry, PartyType::Standalone).unwrap().to, Stage::ReleaseToCm);
        assert!(claim(Stage::ReleaseToCm, PartyType::Child).is_err());
        assert!(claim(Stage::Failed, PartyType::Child).is_err());
        assert!(claim(Stage::Completed, PartyType::Child).is_err());
    }

    #[test]
    fn internal_completion_is_parent_only() {
        assert_eq!(
            complete_internally(Stage::Captured, PartyType::Parent).unwrap().to,
            Stage::Completed
        );
        assert_eq!(
            complete_internally(Stage::Captured, PartyType::Child).unwrap_err(),
            TransitionError::NotParent
        );
        assert!(complete_internally(Stage::Retry, PartyType::Parent).is_err());
    }

    #[test]
    fn reopen_only_from_failed() {
        assert_eq!(reopen(Stage::Failed).unwrap().to, Stage::Retry);
        assert!(reopen(Stage::Retry).is_err());
        assert!(reopen(Stage::Completed).is_err());
    }

    #[test]
    fn claim_clears_the_mirror() {
        let t = claim(Stage::Retry, PartyType::Child).unwrap();
        assert!(t.external.unwrap().is_empty());
        assert!(t.party_id.is_none());
    }

    #[test]
    fn unanswered_claim_releases_to_retry() {
        let note = ExternalMirror {
            error_reason: Some("answer not stored".into()),
            ..Default::default()
        };
        let t = release_unanswered(Stage::ReleaseToCm, &ExternalMirror::default(), note.clone())
            .unwrap();
        assert_eq!(t.to, Stage::Retry);
        assert_eq!(t.external, Some(note.clone()));

        let answered = ExternalMirror {
            status: Some("P".into()),
            ..Default::default()
        };
        assert!(release_unanswered(Stage::ReleaseToCm, &answered, note.clone()).is_err());
        assert!(release_unanswered(Stage::Retry, &ExternalMirror::default(), note).is_err());
    }

    #[test]
    fn partial_update_never_replaces_party_id() {
        let mut record =
            OnboardingRecord::new(EntityKind::Agent, PartyType::Standalone, "Acme");
        record.stage = Stage::ReleaseToCm;
        record.external_party_id = Some("BP1".into());

        let t = apply(Stage::ReleaseToCm, &accepted(AcceptedStatus::Complete, "BP2")).unwrap();
        let update = PartialUpdate::for_transition(&record, &t);
        assert!(!update.assigns_party_id());

        let next = update.apply_to(&record);
        assert_eq!(next.external_party_id.as_deref(), Some("BP1"));
        assert_eq!(next.stage, Stage::Completed);
    }

    #[test]
    fn partial_update_leaves_details_untouched() {
        let mut record = OnboardingRecord::new(EntityKind::Customer, PartyType::Child, "Jane")
            .with_classification("RETAIL", "MOBILE", "KE01")
            .with_tax_id("P051");
        record.stage = Stage::ReleaseToCm;

        let t = apply(Stage::ReleaseToCm, &accepted(AcceptedStatus::Complete, "BP7")).unwrap();
        let next = PartialUpdate::for_transition(&record, &t).apply_to(&record);

        assert_eq!(next.name, record.name);
        assert_eq!(next.tax_id, record.tax_id);
        assert_eq!(next.account_category, record.account_category);
        assert_eq!(next.contact, record.contact);
        assert_eq!(next.created_at, record.created_at);
        assert_eq!(next.external_party_id.as_deref(), Some("BP7"));
    }

    #[test]
    fn mirror_only_keeps_stage() {
        let mut record = OnboardingRecord::new(EntityKind::Agent, PartyType::Child, "A");
        record.stage = Stage::Completed;
        record.status = "SUCCESS".into();
        let mirror = ExternalMirror {
            status: Some("F".into()),
            ..Default::default()
        };
        let next = PartialUpdate::mirror_only(&record, mirror.clone()).apply_to(&record);
        assert_eq!(next.stage, Stage::Completed);
        assert_eq!(next.status, "SUCCESS");
        assert_eq!(next.external, mirror);
    }
}
