//! CM wire format.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::record::{AcceptedStatus, AddressRole, ContactMediumType, EntityKind, PartyType};

/// Create/update request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmPartyRequest {
    pub entity_category: EntityKind,
    pub party_type: PartyType,
    /// Our record id, echoed back by CM for correlation.
    pub external_reference: String,
    /// CM party id; present on updates only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identification: Vec<CmIdentification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact_medium: Vec<CmContactMedium>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<CmAddress>,
    #[serde(default)]
    pub related_party: Vec<CmRelatedParty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmIdentification {
    pub identification_type: String,
    pub identification_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmContactMedium {
    pub medium_type: ContactMediumType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmAddress {
    pub role: AddressRole,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

/// A translated classification code sent as a related party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmRelatedParty {
    pub role: String,
    pub id: String,
}

/// Party reference in a CM response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmPartyRef {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Raw create/update response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmResponseBody {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub related_party: Vec<CmPartyRef>,
}

/// A well-formed CM answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmReply {
    Accepted {
        status: AcceptedStatus,
        party_id: String,
        message: Option<String>,
    },
    Rejected {
        code: String,
        reason: String,
        message: String,
    },
}

impl CmResponseBody {
    /// Validate the body into a reply.
    ///
    /// `S`/`P` must name a party in `relatedParty`; `F` must carry a code.
    /// Anything else is a malformed body.
    pub fn into_reply(self) -> Result<CmReply, GatewayError> {
        let accepted = match self.status.trim() {
            "S" => Some(AcceptedStatus::Complete),
            "P" => Some(AcceptedStatus::InProgress),
            "F" => None,
            other => {
                return Err(GatewayError::Malformed {
                    reason: format!("unknown status {other:?}"),
                });
            }
        };

        match accepted {
            Some(status) => {
                let party_id = self
                    .related_party
                    .into_iter()
                    .map(|p| p.id.trim().to_string())
                    .next()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| GatewayError::Malformed {
                        reason: format!("status {} without a related party id", status.code()),
                    })?;
                Ok(CmReply::Accepted {
                    status,
                    party_id,
                    message: self.message.filter(|m| !m.trim().is_empty()),
                })
            }
            None => {
                let code = self
                    .code
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| GatewayError::Malformed {
                        reason: "status F without an error code".to_string(),
                    })?;
                Ok(CmReply::Rejected {
                    code,
                    reason: self.reason.unwrap_or_default(),
                    message: self.message.unwrap_or_default(),
                })
            }
        }
    }
}

/// A party as CM reports it on the read side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmParty {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> CmResponseBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn success_takes_first_related_party() {
        let reply = body(json!({
            "status": "S",
            "relatedParty": [{"id": "BP123"}, {"id": "BP999"}]
        }))
        .into_reply()
        .unwrap();
        assert_eq!(
            reply,
            CmReply::Accepted {
                status: AcceptedStatus::Complete,
                party_id: "BP123".into(),
                message: None,
            }
        );
    }

    #[test]
    fn pending_is_in_progress() {
        let reply = body(json!({
            "status": "P",
            "message": "Queued",
            "relatedParty": [{"id": "BP7", "role": "SOLD_TO"}]
        }))
        .into_reply()
        .unwrap();
        assert!(matches!(
            reply,
            CmReply::Accepted { status: AcceptedStatus::InProgress, ref message, .. }
                if message.as_deref() == Some("Queued")
        ));
    }

    #[test]
    fn success_without_party_is_malformed() {
        let err = body(json!({"status": "S", "relatedParty": []}))
            .into_reply()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Malformed { .. }));

        let err = body(json!({"status": "P", "relatedParty": [{"id": "  "}]}))
            .into_reply()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Malformed { .. }));
    }

    #[test]
    fn failure_carries_code_reason_message() {
        let reply = body(json!({
            "status": "F",
            "code": "CMONB1",
            "reason": "duplicate",
            "message": "Duplicate onboarding request"
        }))
        .into_reply()
        .unwrap();
        assert_eq!(
            reply,
            CmReply::Rejected {
                code: "CMONB1".into(),
                reason: "duplicate".into(),
                message: "Duplicate onboarding request".into(),
            }
        );
    }

    #[test]
    fn failure_without_code_or_unknown_status_is_malformed() {
        assert!(body(json!({"status": "F"})).into_reply().is_err());
        assert!(body(json!({"status": "X"})).into_reply().is_err());
        assert!(body(json!({})).into_reply().is_err());
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = CmPartyRequest {
            entity_category: EntityKind::Agent,
            party_type: PartyType::Standalone,
            external_reference: "rec-1".into(),
            party_id: None,
            name: "Acme".into(),
            identification: vec![],
            contact_medium: vec![CmContactMedium {
                medium_type: ContactMediumType::Mobile,
                value: "0711".into(),
            }],
            address: vec![],
            related_party: vec![CmRelatedParty {
                role: "DIVISION".into(),
                id: "10".into(),
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["entityCategory"], "AGENT");
        assert_eq!(value["partyType"], "STANDALONE");
        assert_eq!(value["externalReference"], "rec-1");
        assert_eq!(value["contactMedium"][0]["mediumType"], "MOBILE");
        assert_eq!(value["relatedParty"][0]["role"], "DIVISION");
        assert!(value.get("partyId").is_none());
        assert!(value.get("address").is_none());
    }
}
