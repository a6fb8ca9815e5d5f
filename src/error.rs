//! Error types for the onboarding engine.

use std::time::Duration;

use uuid::Uuid;

use crate::orchestrator::validation::ValidationError;
use crate::record::Stage;
use crate::translation::TranslationMiss;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Optimistic check failed: the row's stage changed since it was read.
    #[error("Stage mismatch on record {id}: expected {expected}, found {actual}")]
    StageMismatch {
        id: Uuid,
        expected: Stage,
        actual: Stage,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Transport-level failures talking to CM.
///
/// Every variant belongs to the connectivity class: the orchestrator routes
/// all of them to RETRY without looking at any payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("CM call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("CM unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Malformed CM response: {reason}")]
    Malformed { reason: String },
}

/// Errors that abort a workflow step outright.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Record {id} is in stage {stage}; cannot {operation}")]
    StageConflict {
        id: Uuid,
        stage: Stage,
        operation: &'static str,
    },

    #[error(transparent)]
    TranslationMiss(#[from] TranslationMiss),

    #[error("Onboarding record {id} not found")]
    NotFound { id: Uuid },
}

impl Error {
    /// Whether this error is a stage conflict (caller may re-fetch and retry).
    pub fn is_stage_conflict(&self) -> bool {
        matches!(self, Error::Workflow(WorkflowError::StageConflict { .. }))
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
