//! Downstream "create local user" collaborator.

use async_trait::async_trait;
use tracing::info;

use crate::context::RequestContext;
use crate::record::OnboardingRecord;

/// Provisioning failed downstream.
#[derive(Debug, Clone, thiserror::Error)]
#[error("User provisioning failed: {0}")]
pub struct ProvisionError(pub String);

/// Told once per record, when CM first assigns a party id.
#[async_trait]
pub trait UserProvisioner: Send + Sync {
    async fn provision(
        &self,
        record: &OnboardingRecord,
        ctx: &RequestContext,
    ) -> Result<(), ProvisionError>;
}

/// Provisioner that only records the signal in the log.
#[derive(Debug, Default)]
pub struct LoggingProvisioner;

#[async_trait]
impl UserProvisioner for LoggingProvisioner {
    async fn provision(
        &self,
        record: &OnboardingRecord,
        ctx: &RequestContext,
    ) -> Result<(), ProvisionError> {
        info!(
            record_id = %record.id,
            party_id = record.external_party_id.as_deref().unwrap_or_default(),
            correlation_id = %ctx.correlation_id,
            "Local user provisioning requested"
        );
        Ok(())
    }
}
