//! OnboardingOrchestrator: drives records through the stage graph.
//!
//! Every operation writes exactly one activity entry, whether it succeeds
//! or is refused. State is persisted first and the activity appended
//! afterwards. A CM call is only dispatched after the record has been
//! claimed into RELEASE_TO_CM with an optimistic stage check, so at most one
//! call per record is in flight. A claim whose CM answer could not be stored
//! is logged with that answer and can be reopened into RETRY once no call
//! can still be running.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityAction, ActivityLog, ActivityOutcome, ActivityRecord, NewActivity};
use crate::classifier::ErrorClassifier;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{ConfigError, DatabaseError, Error, GatewayError, Result, WorkflowError};
use crate::gateway::{CmGateway, CmParty, CmPartyRequest, CmReply};
use crate::record::transition::{self, TransitionError, mirror_for};
use crate::record::{
    AcceptedStatus, CmOutcome, ExternalMirror, FieldChange, OnboardingRecord, PartialUpdate,
    RecordChanges, Stage, Transition, diff,
};
use crate::request_builder::{build_create_request, build_update_request};
use crate::store::OnboardingStore;
use crate::translation::TranslationCache;

use super::provisioning::UserProvisioner;
use super::validation::ValidationRules;

/// What an operation ended in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Record captured.
    Captured,
    /// Record handed to KYC.
    AwaitingKyc,
    /// CM completed the party, or a parent record completed internally.
    Completed,
    /// CM accepted and is still processing.
    InProgress,
    /// CM returned a retryable business error.
    RetryScheduled { message: String },
    /// CM returned a terminal business error.
    Failed { message: String },
    /// CM could not be reached; the record waits in RETRY.
    ConnectivityRetry { message: String },
    /// FAILED record, or a claim CM's answer never reached, reopened into RETRY.
    Reopened,
    /// Details changed.
    Updated { changes: Vec<FieldChange> },
    /// CM declined a detail update; local details unchanged.
    UpdateDeclined { retryable: bool, message: String },
}

impl StepOutcome {
    /// Transient failure the caller can simply try again later.
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, Self::ConnectivityRetry { .. })
    }
}

/// Result of a successful operation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The record as stored afterwards.
    pub record: OnboardingRecord,
    /// The activity entry written for the operation.
    pub activity: ActivityRecord,
    pub outcome: StepOutcome,
}

/// An operation's effect, persisted but not yet logged.
struct Applied {
    record: OnboardingRecord,
    activity: ActivityOutcome,
    outcome: StepOutcome,
    assigned_party_id: bool,
}

/// A failed operation and the activity entry describing it.
struct Failure {
    error: Error,
    /// Logged instead of a plain `Aborted` entry.
    activity: Option<ActivityOutcome>,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self {
            error,
            activity: None,
        }
    }
}

impl From<WorkflowError> for Failure {
    fn from(error: WorkflowError) -> Self {
        Error::from(error).into()
    }
}

type Attempt = std::result::Result<Applied, Failure>;

/// Mirror reason for a claim released without a stored CM answer.
const UNANSWERED_REASON: &str = "CM answer for the last dispatch was not stored";

/// Top-level workflow driver.
pub struct OnboardingOrchestrator {
    store: Arc<dyn OnboardingStore>,
    gateway: Arc<dyn CmGateway>,
    provisioner: Arc<dyn UserProvisioner>,
    translations: Arc<TranslationCache>,
    activity: ActivityLog,
    classifier: ErrorClassifier,
    rules: ValidationRules,
    config: EngineConfig,
}

impl OnboardingOrchestrator {
    pub fn new(
        store: Arc<dyn OnboardingStore>,
        gateway: Arc<dyn CmGateway>,
        provisioner: Arc<dyn UserProvisioner>,
        translations: Arc<TranslationCache>,
        config: EngineConfig,
    ) -> Result<Self> {
        let rules = ValidationRules::new().map_err(|e| ConfigError::InvalidValue {
            key: "validation patterns".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            activity: ActivityLog::from_config(store.clone(), &config),
            classifier: ErrorClassifier::from_config(&config),
            store,
            gateway,
            provisioner,
            translations,
            rules,
            config,
        })
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Validate and capture a new record.
    pub async fn submit_initial(
        &self,
        record: OnboardingRecord,
        ctx: &RequestContext,
    ) -> Result<StepResult> {
        let id = record.id;
        match self.capture(record, ctx).await {
            Ok(applied) => self.finish(id, ActivityAction::Submit, ctx, applied).await,
            Err(e) => Err(self.abort(id, ActivityAction::Submit, ctx, e).await),
        }
    }

    /// CAPTURED → RELEASE_TO_KYC.
    pub async fn release_to_kyc(&self, id: Uuid, ctx: &RequestContext) -> Result<StepResult> {
        let record = self.load(id).await?;
        let action = ActivityAction::ReleaseToKyc;
        let result = match transition::release_to_kyc(record.stage) {
            Ok(t) => self.persist_transition(&record, &t, "release to KYC").await,
            Err(_) => Err(conflict(&record, "release to KYC")),
        };
        match result {
            Ok(stored) => {
                let applied = Applied {
                    activity: transitioned(record.stage, stored.stage, None),
                    record: stored,
                    outcome: StepOutcome::AwaitingKyc,
                    assigned_party_id: false,
                };
                self.finish(id, action, ctx, applied).await
            }
            Err(e) => Err(self.abort(id, action, ctx, e).await),
        }
    }

    /// Approve a CAPTURED or RELEASE_TO_KYC record.
    ///
    /// Parent records complete internally. Everything else is validated,
    /// translated and sent to CM; the answer decides the next stage.
    pub async fn approve(&self, id: Uuid, ctx: &RequestContext) -> Result<StepResult> {
        let record = self.load(id).await?;
        let action = ActivityAction::Approve;
        let result: Attempt = if !record.stage.is_approvable() {
            Err(conflict(&record, "approve").into())
        } else if record.party_type.is_parent() {
            self.complete_parent(&record).await.map_err(Failure::from)
        } else {
            match self.rules.validate(&record) {
                Ok(()) => self.dispatch(&record, "approve").await,
                Err(e) => Err(WorkflowError::from(e).into()),
            }
        };
        self.settle(id, action, ctx, result).await
    }

    /// Resubmit a RETRY record to CM without re-validating it.
    pub async fn retry(&self, id: Uuid, ctx: &RequestContext) -> Result<StepResult> {
        let record = self.load(id).await?;
        let result: Attempt = if record.stage == Stage::Retry {
            self.dispatch(&record, "retry").await
        } else {
            Err(conflict(&record, "retry").into())
        };
        self.settle(id, ActivityAction::Retry, ctx, result).await
    }

    /// FAILED → RETRY, without calling CM.
    ///
    /// Also releases a RELEASE_TO_CM claim whose CM answer was never stored,
    /// once it has been held longer than the gateway timeout.
    pub async fn reopen(&self, id: Uuid, ctx: &RequestContext) -> Result<StepResult> {
        let record = self.load(id).await?;
        let action = ActivityAction::Reopen;
        let result = match self.reopen_transition(&record) {
            Ok(t) => self
                .persist_transition(&record, &t, "reopen")
                .await
                .map(|stored| (stored, t.status_msg().map(String::from))),
            Err(_) => Err(conflict(&record, "reopen")),
        };
        match result {
            Ok((stored, message)) => {
                let applied = Applied {
                    activity: transitioned(record.stage, stored.stage, message),
                    record: stored,
                    outcome: StepOutcome::Reopened,
                    assigned_party_id: false,
                };
                self.finish(id, action, ctx, applied).await
            }
            Err(e) => Err(self.abort(id, action, ctx, e).await),
        }
    }

    /// Change a record's details.
    ///
    /// Records CM already knows are updated in CM first; local details only
    /// change once CM accepts. A CM refusal or outage leaves the details as
    /// they were and only refreshes the mirror.
    pub async fn update(
        &self,
        id: Uuid,
        changes: &RecordChanges,
        ctx: &RequestContext,
    ) -> Result<StepResult> {
        let record = self.load(id).await?;
        let result = self.apply_changes(&record, changes).await;
        match result {
            Ok(applied) => self.finish(id, ActivityAction::Update, ctx, applied).await,
            Err(e) => Err(self.abort(id, ActivityAction::Update, ctx, e).await),
        }
    }

    // ── Read side ───────────────────────────────────────────────────

    /// Fetch a record.
    pub async fn get(&self, id: Uuid) -> Result<OnboardingRecord> {
        self.load(id).await
    }

    /// Activity trail of a record, oldest first.
    pub async fn history(&self, id: Uuid) -> Result<Vec<ActivityRecord>> {
        Ok(self.activity.history(id).await?)
    }

    /// Records currently in `stage`.
    pub async fn records_in_stage(&self, stage: Stage) -> Result<Vec<OnboardingRecord>> {
        Ok(self.store.records_in_stage(stage).await?)
    }

    /// CM's view of a record's party; `None` before CM assigned one.
    pub async fn external_party(&self, id: Uuid) -> Result<Option<CmParty>> {
        let record = self.load(id).await?;
        match record.external_party_id.as_deref() {
            Some(party_id) => Ok(Some(self.gateway.get_by_external_id(party_id).await?)),
            None => Ok(None),
        }
    }

    /// All parties CM knows about.
    pub async fn external_parties(&self) -> Result<Vec<CmParty>> {
        Ok(self.gateway.list().await?)
    }

    /// Live feed of appended activity entries.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityRecord> {
        self.activity.subscribe()
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn load(&self, id: Uuid) -> Result<OnboardingRecord> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id }.into())
    }

    async fn capture(&self, mut record: OnboardingRecord, ctx: &RequestContext) -> Result<Applied> {
        record.stage = Stage::Captured;
        record.status = Stage::Captured.status_label().to_string();
        record.external_party_id = None;
        record.external = Default::default();
        if record.created_by.trim().is_empty() {
            record.created_by = ctx.actor.clone();
        }

        self.rules.validate(&record).map_err(WorkflowError::from)?;
        self.store.insert_record(&record).await?;
        info!(record_id = %record.id, kind = %record.entity_kind, party_type = %record.party_type, "Record captured");

        Ok(Applied {
            activity: ActivityOutcome::Created {
                stage: record.stage,
            },
            record,
            outcome: StepOutcome::Captured,
            assigned_party_id: false,
        })
    }

    fn reopen_transition(
        &self,
        record: &OnboardingRecord,
    ) -> std::result::Result<Transition, TransitionError> {
        if record.stage != Stage::ReleaseToCm {
            return transition::reopen(record.stage);
        }
        if self.call_may_be_in_flight(record) {
            return Err(TransitionError::Invalid {
                from: record.stage,
                to: Stage::Retry,
            });
        }
        let note = ExternalMirror {
            error_reason: Some(UNANSWERED_REASON.to_string()),
            status_msg: Some(self.config.messages.connectivity_retry.clone()),
            ..Default::default()
        };
        info!(record_id = %record.id, "Releasing unanswered CM claim");
        transition::release_unanswered(record.stage, &record.external, note)
    }

    /// A claim younger than the gateway timeout may still have its call running.
    fn call_may_be_in_flight(&self, record: &OnboardingRecord) -> bool {
        let held = (Utc::now() - record.updated_at).to_std().unwrap_or_default();
        held <= self.config.gateway_timeout
    }

    async fn complete_parent(&self, record: &OnboardingRecord) -> Result<Applied> {
        let t = transition::complete_internally(record.stage, record.party_type)
            .map_err(|_| conflict(record, "approve"))?;
        let stored = self.persist_transition(record, &t, "approve").await?;
        info!(record_id = %record.id, "Parent record completed without CM");
        Ok(Applied {
            activity: transitioned(record.stage, stored.stage, None),
            record: stored,
            outcome: StepOutcome::Completed,
            assigned_party_id: false,
        })
    }

    /// Build, claim, call CM, apply the outcome.
    async fn dispatch(&self, record: &OnboardingRecord, operation: &'static str) -> Attempt {
        let table = self.translations.snapshot().await;
        let request = build_create_request(record, &table).map_err(WorkflowError::from)?;

        let claim = transition::claim(record.stage, record.party_type)
            .map_err(|_| conflict(record, operation))?;
        let claimed = self.persist_transition(record, &claim, operation).await?;

        let outcome = self.call_cm(record.id, &request, false).await;
        let t = transition::apply(claimed.stage, &outcome)
            .map_err(|_| conflict(&claimed, operation))?;
        if let (Some(existing), Some(reported)) = (&claimed.external_party_id, &t.party_id) {
            if existing != reported {
                warn!(
                    record_id = %record.id,
                    existing = %existing,
                    reported = %reported,
                    "CM reported a different party id; keeping the original"
                );
            }
        }
        let update = PartialUpdate::for_transition(&claimed, &t);
        let stored = match self.store_outcome(&claimed, &update).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(
                    record_id = %record.id,
                    to = %t.to,
                    party_id = t.party_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "CM outcome could not be stored; record stays claimed"
                );
                return Err(Failure {
                    activity: Some(ActivityOutcome::OutcomeNotStored {
                        from: claimed.stage,
                        to: t.to,
                        party_id: t.party_id.clone(),
                        message: t.status_msg().map(String::from),
                        error: e.to_string(),
                    }),
                    error: stage_conflict(e, operation),
                });
            }
        };

        info!(
            record_id = %record.id,
            from = %record.stage,
            to = %stored.stage,
            party_id = stored.external_party_id.as_deref().unwrap_or_default(),
            "CM outcome applied"
        );

        Ok(Applied {
            activity: transitioned(record.stage, stored.stage, t.status_msg().map(String::from)),
            record: stored,
            outcome: step_outcome(&outcome),
            assigned_party_id: update.assigns_party_id(),
        })
    }

    /// Write a CM outcome onto the claimed record, retrying store failures
    /// other than a stage mismatch or a vanished record.
    async fn store_outcome(
        &self,
        claimed: &OnboardingRecord,
        update: &PartialUpdate,
    ) -> std::result::Result<OnboardingRecord, DatabaseError> {
        let attempts = self.config.activity_append_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .store
                .apply_partial_update(claimed.id, claimed.stage, update)
                .await
            {
                Ok(stored) => return Ok(stored),
                Err(e @ (DatabaseError::StageMismatch { .. } | DatabaseError::NotFound { .. })) => {
                    return Err(e);
                }
                Err(e) if attempt < attempts => {
                    warn!(record_id = %claimed.id, attempt, error = %e, "Storing CM outcome failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.activity_retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_changes(
        &self,
        record: &OnboardingRecord,
        changes: &RecordChanges,
    ) -> Result<Applied> {
        if !record.stage.accepts_updates() {
            return Err(conflict(record, "update"));
        }

        let next = changes.apply_to(record);
        let changed = diff(record, &next);
        if changed.is_empty() {
            return Ok(Applied {
                record: record.clone(),
                activity: ActivityOutcome::Updated { changes: changed },
                outcome: StepOutcome::Updated {
                    changes: Vec::new(),
                },
                assigned_party_id: false,
            });
        }
        self.rules.validate(&next).map_err(WorkflowError::from)?;

        // The mirror is only written when CM was called.
        let mut mirror = None;
        if next.requires_external_call() && next.external_party_id.is_some() {
            let table = self.translations.snapshot().await;
            let request = build_update_request(&next, &table).map_err(WorkflowError::from)?;
            let outcome = self.call_cm(record.id, &request, true).await;

            match &outcome {
                CmOutcome::Accepted { .. } => mirror = Some(mirror_for(&outcome)),
                CmOutcome::Rejected { verdict, .. } => {
                    let message = verdict.user_message.clone();
                    let retryable = verdict.retryable;
                    return self.decline_update(record, &outcome, retryable, message).await;
                }
                CmOutcome::Unreachable { user_message, .. } => {
                    let message = user_message.clone();
                    return self.decline_update(record, &outcome, true, message).await;
                }
            }
        }

        let stored = self
            .store
            .update_details(&next, record.stage, mirror.as_ref())
            .await
            .map_err(|e| stage_conflict(e, "update"))?;
        info!(record_id = %record.id, fields = changed.len(), "Record details updated");

        Ok(Applied {
            record: stored,
            activity: ActivityOutcome::Updated {
                changes: changed.clone(),
            },
            outcome: StepOutcome::Updated { changes: changed },
            assigned_party_id: false,
        })
    }

    async fn decline_update(
        &self,
        record: &OnboardingRecord,
        outcome: &CmOutcome,
        retryable: bool,
        message: String,
    ) -> Result<Applied> {
        let update = PartialUpdate::mirror_only(record, mirror_for(outcome));
        let stored = self
            .store
            .apply_partial_update(record.id, record.stage, &update)
            .await
            .map_err(|e| stage_conflict(e, "update"))?;
        warn!(record_id = %record.id, retryable, "CM declined detail update");
        Ok(Applied {
            record: stored,
            activity: ActivityOutcome::UpdateDeclined {
                retryable,
                message: message.clone(),
            },
            outcome: StepOutcome::UpdateDeclined { retryable, message },
            assigned_party_id: false,
        })
    }

    /// One CM call under the configured timeout, folded into a [`CmOutcome`].
    async fn call_cm(&self, record_id: Uuid, request: &CmPartyRequest, update: bool) -> CmOutcome {
        let after = self.config.gateway_timeout;
        let call = async {
            if update {
                self.gateway.update_onboarding(request).await
            } else {
                self.gateway.create_onboarding(request).await
            }
        };
        let reply = match tokio::time::timeout(after, call).await {
            Ok(reply) => reply,
            Err(_) => Err(GatewayError::Timeout { after }),
        };

        match reply {
            Ok(CmReply::Accepted {
                status,
                party_id,
                message,
            }) => CmOutcome::Accepted {
                status,
                party_id,
                message,
            },
            Ok(CmReply::Rejected {
                code,
                reason,
                message,
            }) => {
                let verdict = self.classifier.classify(&code, &message);
                info!(record_id = %record_id, code = %code, retryable = verdict.retryable, "CM rejected request");
                CmOutcome::Rejected {
                    code,
                    reason,
                    message,
                    verdict,
                }
            }
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "CM connectivity failure");
                let messages = &self.config.messages;
                CmOutcome::Unreachable {
                    reason: format!("{}: {e}", messages.connectivity_reason),
                    user_message: messages.connectivity_retry.clone(),
                }
            }
        }
    }

    async fn persist_transition(
        &self,
        record: &OnboardingRecord,
        t: &Transition,
        operation: &'static str,
    ) -> Result<OnboardingRecord> {
        let update = PartialUpdate::for_transition(record, t);
        self.store
            .apply_partial_update(record.id, record.stage, &update)
            .await
            .map_err(|e| stage_conflict(e, operation))
    }

    async fn settle(
        &self,
        id: Uuid,
        action: ActivityAction,
        ctx: &RequestContext,
        result: Attempt,
    ) -> Result<StepResult> {
        match result {
            Ok(applied) => {
                // Provisioned from the stored record even if the append fails.
                let assigned = applied.assigned_party_id.then(|| applied.record.clone());
                let step = self.finish(id, action, ctx, applied).await;
                if let Some(record) = assigned {
                    if let Err(e) = self.provisioner.provision(&record, ctx).await {
                        warn!(record_id = %id, error = %e, "Local user provisioning failed");
                    }
                }
                step
            }
            Err(failure) => Err(self.log_failure(id, action, ctx, failure).await),
        }
    }

    /// Log the applied operation.
    async fn finish(
        &self,
        id: Uuid,
        action: ActivityAction,
        ctx: &RequestContext,
        applied: Applied,
    ) -> Result<StepResult> {
        let activity = self
            .activity
            .append(NewActivity::new(id, action, applied.activity, ctx))
            .await?;
        Ok(StepResult {
            record: applied.record,
            activity,
            outcome: applied.outcome,
        })
    }

    /// Log a refused operation and hand the error back.
    async fn abort(&self, id: Uuid, action: ActivityAction, ctx: &RequestContext, err: Error) -> Error {
        self.log_failure(id, action, ctx, err.into()).await
    }

    async fn log_failure(
        &self,
        id: Uuid,
        action: ActivityAction,
        ctx: &RequestContext,
        failure: Failure,
    ) -> Error {
        let Failure { error: err, activity } = failure;
        warn!(record_id = %id, action = %action, error = %err, "Operation aborted");
        let outcome = activity.unwrap_or_else(|| ActivityOutcome::Aborted {
            error: err.to_string(),
        });
        let entry = NewActivity::new(id, action, outcome, ctx);
        if let Err(log_err) = self.activity.append(entry).await {
            error!(record_id = %id, error = %log_err, "Could not record failed operation");
        }
        err
    }
}

fn conflict(record: &OnboardingRecord, operation: &'static str) -> Error {
    WorkflowError::StageConflict {
        id: record.id,
        stage: record.stage,
        operation,
    }
    .into()
}

/// A stage mismatch at the store is a stage conflict for the caller.
fn stage_conflict(e: DatabaseError, operation: &'static str) -> Error {
    match e {
        DatabaseError::StageMismatch { id, actual, .. } => WorkflowError::StageConflict {
            id,
            stage: actual,
            operation,
        }
        .into(),
        other => other.into(),
    }
}

fn transitioned(from: Stage, to: Stage, message: Option<String>) -> ActivityOutcome {
    ActivityOutcome::Transitioned { from, to, message }
}

fn step_outcome(outcome: &CmOutcome) -> StepOutcome {
    match outcome {
        CmOutcome::Accepted {
            status: AcceptedStatus::Complete,
            ..
        } => StepOutcome::Completed,
        CmOutcome::Accepted {
            status: AcceptedStatus::InProgress,
            ..
        } => StepOutcome::InProgress,
        CmOutcome::Rejected { verdict, .. } if verdict.retryable => StepOutcome::RetryScheduled {
            message: verdict.user_message.clone(),
        },
        CmOutcome::Rejected { verdict, .. } => StepOutcome::Failed {
            message: verdict.user_message.clone(),
        },
        CmOutcome::Unreachable { user_message, .. } => StepOutcome::ConnectivityRetry {
            message: user_message.clone(),
        },
    }
}
