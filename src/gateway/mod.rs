//! Gateway to the external master-data system ("CM").
//!
//! The orchestrator only sees the [`CmGateway`] trait. Every transport fault
//! comes back as a [`GatewayError`]; well-formed answers come back as a
//! [`CmReply`], whether CM accepted the request or not.

pub mod http;
pub mod types;

use async_trait::async_trait;

use crate::error::GatewayError;

pub use http::{GatewayConfig, HttpCmGateway};
pub use types::{
    CmAddress, CmContactMedium, CmIdentification, CmParty, CmPartyRef, CmPartyRequest,
    CmRelatedParty, CmReply, CmResponseBody,
};

/// Contract with CM.
#[async_trait]
pub trait CmGateway: Send + Sync {
    /// Submit a new party.
    async fn create_onboarding(&self, request: &CmPartyRequest) -> Result<CmReply, GatewayError>;

    /// Update an existing party. `request.party_id` is set.
    async fn update_onboarding(&self, request: &CmPartyRequest) -> Result<CmReply, GatewayError>;

    /// Fetch one party by its CM id.
    async fn get_by_external_id(&self, party_id: &str) -> Result<CmParty, GatewayError>;

    /// List parties known to CM.
    async fn list(&self) -> Result<Vec<CmParty>, GatewayError>;
}
