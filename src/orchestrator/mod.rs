//! Workflow orchestration: validation, CM dispatch, activity logging.

pub mod engine;
pub mod provisioning;
pub mod validation;

pub use engine::{OnboardingOrchestrator, StepOutcome, StepResult};
pub use provisioning::{LoggingProvisioner, ProvisionError, UserProvisioner};
pub use validation::{FieldIssue, ValidationError, ValidationRules};
