//! In-process store with the same optimistic semantics as the libSQL backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::activity::{ActivityRecord, NewActivity};
use crate::error::DatabaseError;
use crate::record::{ExternalMirror, OnboardingRecord, PartialUpdate, Stage};
use crate::translation::ReferenceRow;

use super::traits::{OnboardingStore, copy_details};

/// `OnboardingStore` backed by in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, OnboardingRecord>>,
    activity: RwLock<HashMap<Uuid, Vec<ActivityRecord>>>,
    reference: RwLock<Vec<ReferenceRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed reference rows in one go.
    pub async fn with_reference_rows(self, rows: Vec<ReferenceRow>) -> Self {
        self.reference.write().await.extend(rows);
        self
    }
}

fn check_stage(record: &OnboardingRecord, expected: Stage) -> Result<(), DatabaseError> {
    if record.stage == expected {
        Ok(())
    } else {
        Err(DatabaseError::StageMismatch {
            id: record.id,
            expected,
            actual: record.stage,
        })
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "onboarding_record".to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl OnboardingStore for MemoryStore {
    async fn insert_record(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(DatabaseError::Constraint(format!(
                "onboarding record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<OnboardingRecord>, DatabaseError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn apply_partial_update(
        &self,
        id: Uuid,
        expected: Stage,
        update: &PartialUpdate,
    ) -> Result<OnboardingRecord, DatabaseError> {
        let mut records = self.records.write().await;
        let stored = records.get_mut(&id).ok_or_else(|| not_found(id))?;
        check_stage(stored, expected)?;

        let mut next = update.apply_to(stored);
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn update_details(
        &self,
        record: &OnboardingRecord,
        expected: Stage,
        mirror: Option<&ExternalMirror>,
    ) -> Result<OnboardingRecord, DatabaseError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| not_found(record.id))?;
        check_stage(stored, expected)?;

        copy_details(stored, record);
        if let Some(mirror) = mirror {
            stored.external = mirror.clone();
        }
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn records_in_stage(&self, stage: Stage) -> Result<Vec<OnboardingRecord>, DatabaseError> {
        let mut found: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, DatabaseError> {
        let mut activity = self.activity.write().await;
        let trail = activity.entry(entry.record_id).or_default();
        let sequence = trail.last().map(|r| r.sequence + 1).unwrap_or(1);
        let stored = ActivityRecord::from_new(entry, sequence);
        trail.push(stored.clone());
        Ok(stored)
    }

    async fn list_activity(&self, record_id: Uuid) -> Result<Vec<ActivityRecord>, DatabaseError> {
        Ok(self
            .activity
            .read()
            .await
            .get(&record_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_reference_rows(&self) -> Result<Vec<ReferenceRow>, DatabaseError> {
        Ok(self.reference.read().await.clone())
    }

    async fn insert_reference_row(&self, row: &ReferenceRow) -> Result<(), DatabaseError> {
        self.reference.write().await.push(row.clone());
        Ok(())
    }
}
