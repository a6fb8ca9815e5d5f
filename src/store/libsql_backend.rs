//! libSQL backend: async `OnboardingStore` implementation.
//!
//! Supports local file and in-memory databases. Optimistic writes are a
//! single `UPDATE ... WHERE id = ? AND stage = ?`, so two writers racing on
//! one record cannot both succeed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::activity::{ActivityRecord, NewActivity};
use crate::error::DatabaseError;
use crate::record::{ExternalMirror, OnboardingRecord, PartialUpdate, Stage};
use crate::store::migrations;
use crate::store::traits::OnboardingStore;
use crate::translation::ReferenceRow;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(store.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(store.conn()).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Tell a missing row apart from a stage mismatch after a zero-row update.
    async fn explain_miss(&self, id: Uuid, expected: Stage) -> DatabaseError {
        match self.get_record(id).await {
            Ok(Some(current)) => DatabaseError::StageMismatch {
                id,
                expected,
                actual: current.stage,
            },
            Ok(None) => not_found(id),
            Err(e) => e,
        }
    }

    async fn fetch_existing(&self, id: Uuid) -> Result<OnboardingRecord, DatabaseError> {
        self.get_record(id).await?.ok_or_else(|| not_found(id))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "onboarding_record".to_string(),
        id: id.to_string(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn parse_column<T>(raw: &str, column: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| DatabaseError::Serialization(format!("{column}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{column}: {e}")))
}

const RECORD_COLUMNS: &str = "id, entity_kind, party_type, stage, status, external_party_id, \
     external_status, external_status_code, external_error_reason, external_status_msg, \
     name, tax_id, registration_number, account_category, division, sales_org, \
     distribution_channel, contact, billing_address, installation_address, \
     created_by, created_at, updated_at";

const ACTIVITY_COLUMNS: &str =
    "id, record_id, sequence, action, outcome, correlation_id, actor, created_at";

/// Map a libsql Row to an OnboardingRecord. Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<OnboardingRecord, DatabaseError> {
    let text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("record column {idx}: {e}")))
    };
    let opt = |idx: i32| -> Option<String> { row.get::<String>(idx).ok() };

    Ok(OnboardingRecord {
        id: parse_column(&text(0)?, "id")?,
        entity_kind: parse_column(&text(1)?, "entity_kind")?,
        party_type: parse_column(&text(2)?, "party_type")?,
        stage: parse_column(&text(3)?, "stage")?,
        status: text(4)?,
        external_party_id: opt(5),
        external: ExternalMirror {
            status: opt(6),
            status_code: opt(7),
            error_reason: opt(8),
            status_msg: opt(9),
        },
        name: text(10)?,
        tax_id: opt(11),
        registration_number: opt(12),
        account_category: text(13)?,
        division: text(14)?,
        sales_org: text(15)?,
        distribution_channel: opt(16),
        contact: from_json(&text(17)?, "contact")?,
        billing_address: from_json(&text(18)?, "billing_address")?,
        installation_address: from_json(&text(19)?, "installation_address")?,
        created_by: text(20)?,
        created_at: parse_datetime(&text(21)?),
        updated_at: parse_datetime(&text(22)?),
    })
}

/// Map a libsql Row to an ActivityRecord. Column order matches ACTIVITY_COLUMNS.
fn row_to_activity(row: &libsql::Row) -> Result<ActivityRecord, DatabaseError> {
    let text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("activity column {idx}: {e}")))
    };
    let sequence: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("activity sequence: {e}")))?;

    Ok(ActivityRecord {
        id: parse_column(&text(0)?, "id")?,
        record_id: parse_column(&text(1)?, "record_id")?,
        sequence,
        action: parse_column(&text(3)?, "action")?,
        outcome: from_json(&text(4)?, "outcome")?,
        correlation_id: parse_column(&text(5)?, "correlation_id")?,
        actor: text(6)?,
        created_at: parse_datetime(&text(7)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl OnboardingStore for LibSqlStore {
    async fn insert_record(&self, record: &OnboardingRecord) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO onboarding_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
            ),
            params![
                record.id.to_string(),
                record.entity_kind.as_str(),
                record.party_type.as_str(),
                record.stage.as_str(),
                record.status.as_str(),
                opt_text(record.external_party_id.as_deref()),
                opt_text(record.external.status.as_deref()),
                opt_text(record.external.status_code.as_deref()),
                opt_text(record.external.error_reason.as_deref()),
                opt_text(record.external.status_msg.as_deref()),
                record.name.as_str(),
                opt_text(record.tax_id.as_deref()),
                opt_text(record.registration_number.as_deref()),
                record.account_category.as_str(),
                record.division.as_str(),
                record.sales_org.as_str(),
                opt_text(record.distribution_channel.as_deref()),
                to_json(&record.contact)?,
                to_json(&record.billing_address)?,
                to_json(&record.installation_address)?,
                record.created_by.as_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Constraint(format!("onboarding record {} already exists", record.id))
            } else {
                DatabaseError::Query(format!("insert_record: {msg}"))
            }
        })?;

        debug!(record_id = %record.id, stage = %record.stage, "Record inserted into DB");
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<OnboardingRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM onboarding_records WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn apply_partial_update(
        &self,
        id: Uuid,
        expected: Stage,
        update: &PartialUpdate,
    ) -> Result<OnboardingRecord, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        // The party id is only ever filled in, never replaced.
        let affected = match &update.external {
            Some(mirror) => conn
                .execute(
                    "UPDATE onboarding_records SET stage = ?1, status = ?2, \
                     external_party_id = COALESCE(external_party_id, ?3), updated_at = ?4, \
                     external_status = ?5, external_status_code = ?6, \
                     external_error_reason = ?7, external_status_msg = ?8 \
                     WHERE id = ?9 AND stage = ?10",
                    params![
                        update.stage.as_str(),
                        update.status.as_str(),
                        opt_text(update.external_party_id.as_deref()),
                        now,
                        opt_text(mirror.status.as_deref()),
                        opt_text(mirror.status_code.as_deref()),
                        opt_text(mirror.error_reason.as_deref()),
                        opt_text(mirror.status_msg.as_deref()),
                        id.to_string(),
                        expected.as_str(),
                    ],
                )
                .await,
            None => conn
                .execute(
                    "UPDATE onboarding_records SET stage = ?1, status = ?2, \
                     external_party_id = COALESCE(external_party_id, ?3), updated_at = ?4 \
                     WHERE id = ?5 AND stage = ?6",
                    params![
                        update.stage.as_str(),
                        update.status.as_str(),
                        opt_text(update.external_party_id.as_deref()),
                        now,
                        id.to_string(),
                        expected.as_str(),
                    ],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("apply_partial_update: {e}")))?;

        if affected == 0 {
            return Err(self.explain_miss(id, expected).await);
        }

        debug!(record_id = %id, from = %expected, to = %update.stage, "Partial update applied");
        self.fetch_existing(id).await
    }

    async fn update_details(
        &self,
        record: &OnboardingRecord,
        expected: Stage,
        mirror: Option<&ExternalMirror>,
    ) -> Result<OnboardingRecord, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let contact = to_json(&record.contact)?;
        let billing = to_json(&record.billing_address)?;
        let installation = to_json(&record.installation_address)?;

        let affected = match mirror {
            Some(mirror) => conn
                .execute(
                    "UPDATE onboarding_records SET name = ?1, tax_id = ?2, registration_number = ?3, \
                     account_category = ?4, division = ?5, sales_org = ?6, distribution_channel = ?7, \
                     contact = ?8, billing_address = ?9, installation_address = ?10, updated_at = ?11, \
                     external_status = ?12, external_status_code = ?13, external_error_reason = ?14, \
                     external_status_msg = ?15 \
                     WHERE id = ?16 AND stage = ?17",
                    params![
                        record.name.as_str(),
                        opt_text(record.tax_id.as_deref()),
                        opt_text(record.registration_number.as_deref()),
                        record.account_category.as_str(),
                        record.division.as_str(),
                        record.sales_org.as_str(),
                        opt_text(record.distribution_channel.as_deref()),
                        contact,
                        billing,
                        installation,
                        now,
                        opt_text(mirror.status.as_deref()),
                        opt_text(mirror.status_code.as_deref()),
                        opt_text(mirror.error_reason.as_deref()),
                        opt_text(mirror.status_msg.as_deref()),
                        record.id.to_string(),
                        expected.as_str(),
                    ],
                )
                .await,
            None => conn
                .execute(
                    "UPDATE onboarding_records SET name = ?1, tax_id = ?2, registration_number = ?3, \
                     account_category = ?4, division = ?5, sales_org = ?6, distribution_channel = ?7, \
                     contact = ?8, billing_address = ?9, installation_address = ?10, updated_at = ?11 \
                     WHERE id = ?12 AND stage = ?13",
                    params![
                        record.name.as_str(),
                        opt_text(record.tax_id.as_deref()),
                        opt_text(record.registration_number.as_deref()),
                        record.account_category.as_str(),
                        record.division.as_str(),
                        record.sales_org.as_str(),
                        opt_text(record.distribution_channel.as_deref()),
                        contact,
                        billing,
                        installation,
                        now,
                        record.id.to_string(),
                        expected.as_str(),
                    ],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("update_details: {e}")))?;

        if affected == 0 {
            return Err(self.explain_miss(record.id, expected).await);
        }

        debug!(record_id = %record.id, "Record details updated");
        self.fetch_existing(record.id).await
    }

    async fn records_in_stage(&self, stage: Stage) -> Result<Vec<OnboardingRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM onboarding_records WHERE stage = ?1 ORDER BY created_at ASC"
                ),
                params![stage.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("records_in_stage: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("records_in_stage: {e}")))?
        {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping onboarding record row: {e}"),
            }
        }
        Ok(records)
    }

    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityRecord, DatabaseError> {
        let conn = self.conn();
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        // Sequence assignment and insert happen in one statement.
        conn.execute(
            "INSERT INTO activity_log (id, record_id, sequence, action, outcome, correlation_id, actor, created_at) \
             SELECT ?1, ?2, COALESCE(MAX(sequence), 0) + 1, ?3, ?4, ?5, ?6, ?7 \
             FROM activity_log WHERE record_id = ?2",
            params![
                id.to_string(),
                entry.record_id.to_string(),
                entry.action.as_str(),
                to_json(&entry.outcome)?,
                entry.correlation_id.to_string(),
                entry.actor.as_str(),
                created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_activity: {e}")))?;

        let mut rows = conn
            .query(
                &format!("SELECT {ACTIVITY_COLUMNS} FROM activity_log WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_activity: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_activity(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "activity".to_string(),
                id: id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("append_activity: {e}"))),
        }
    }

    async fn list_activity(&self, record_id: Uuid) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activity_log WHERE record_id = ?1 ORDER BY sequence ASC"
                ),
                params![record_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_activity: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_activity: {e}")))?
        {
            out.push(row_to_activity(&row)?);
        }
        Ok(out)
    }

    async fn load_reference_rows(&self) -> Result<Vec<ReferenceRow>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT category, group_key, source_value, target_code FROM reference_codes ORDER BY id ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_reference_rows: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_reference_rows: {e}")))?
        {
            let get = |idx: i32| {
                row.get::<String>(idx)
                    .map_err(|e| DatabaseError::Query(format!("reference column {idx}: {e}")))
            };
            out.push(ReferenceRow {
                category: get(0)?,
                group: get(1)?,
                source: get(2)?,
                code: get(3)?,
            });
        }
        Ok(out)
    }

    async fn insert_reference_row(&self, row: &ReferenceRow) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO reference_codes (category, group_key, source_value, target_code) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.category.as_str(),
                    row.group.as_str(),
                    row.source.as_str(),
                    row.code.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_reference_row: {e}")))?;
        Ok(())
    }
}
