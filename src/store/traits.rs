//! `OnboardingStore` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::activity::{ActivityRecord, NewActivity};
use crate::error::DatabaseError;
use crate::record::{ExternalMirror, OnboardingRecord, PartialUpdate, Stage};
use crate::translation::ReferenceRow;

/// Backend-agnostic persistence for records, activity and reference data.
///
/// Writes to an existing record are optimistic: they name the stage the
/// caller read, and fail with [`DatabaseError::StageMismatch`] if the stored
/// stage differs. Nothing here retries a mismatch.
#[async_trait]
pub trait OnboardingStore: Send + Sync {
    // ── Records ─────────────────────────────────────────────────────

    /// Insert a new record. A duplicate id is a constraint violation.
    async fn insert_record(&self, record: &OnboardingRecord) -> Result<(), DatabaseError>;

    /// Get a record by id.
    async fn get_record(&self, id: Uuid) -> Result<Option<OnboardingRecord>, DatabaseError>;

    /// Apply an allowlisted partial update if the stored stage is `expected`.
    /// Returns the record as stored afterwards.
    async fn apply_partial_update(
        &self,
        id: Uuid,
        expected: Stage,
        update: &PartialUpdate,
    ) -> Result<OnboardingRecord, DatabaseError>;

    /// Write the detail fields of `record` if the stored stage is `expected`.
    /// The mirror is replaced only when `mirror` is given; the one carried by
    /// `record` is ignored. Stage, status, party id and creation data are
    /// untouched.
    async fn update_details(
        &self,
        record: &OnboardingRecord,
        expected: Stage,
        mirror: Option<&ExternalMirror>,
    ) -> Result<OnboardingRecord, DatabaseError>;

    /// Records currently in `stage`, oldest first.
    async fn records_in_stage(&self, stage: Stage) -> Result<Vec<OnboardingRecord>, DatabaseError>;

    // ── Activity ────────────────────────────────────────────────────

    /// Append an activity entry, assigning the next sequence for its record.
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, DatabaseError>;

    /// All activity of a record in sequence order.
    async fn list_activity(&self, record_id: Uuid) -> Result<Vec<ActivityRecord>, DatabaseError>;

    // ── Reference data ──────────────────────────────────────────────

    /// All translation rows in insertion order.
    async fn load_reference_rows(&self) -> Result<Vec<ReferenceRow>, DatabaseError>;

    /// Add a translation row.
    async fn insert_reference_row(&self, row: &ReferenceRow) -> Result<(), DatabaseError>;
}

/// Copy the caller-editable fields of `source` onto `target`.
pub(crate) fn copy_details(target: &mut OnboardingRecord, source: &OnboardingRecord) {
    target.name = source.name.clone();
    target.tax_id = source.tax_id.clone();
    target.registration_number = source.registration_number.clone();
    target.account_category = source.account_category.clone();
    target.division = source.division.clone();
    target.sales_org = source.sales_org.clone();
    target.distribution_channel = source.distribution_channel.clone();
    target.contact = source.contact.clone();
    target.billing_address = source.billing_address.clone();
    target.installation_address = source.installation_address.clone();
}
