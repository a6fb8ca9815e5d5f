//! Builds CM requests from onboarding records.
//!
//! Pure functions: the same record and table always produce the same
//! request. Classification values are translated through the table and a
//! missing code fails the whole build.

use crate::gateway::{
    CmAddress, CmContactMedium, CmIdentification, CmPartyRequest, CmRelatedParty,
};
use crate::record::OnboardingRecord;
use crate::record::model::present;
use crate::translation::{CodeTranslationTable, TranslationMiss, groups};

/// Request for CM's create call.
pub fn build_create_request(
    record: &OnboardingRecord,
    table: &CodeTranslationTable,
) -> Result<CmPartyRequest, TranslationMiss> {
    let category = record.entity_kind.as_str();

    let mut related_party = Vec::with_capacity(4);
    for (group, value) in [
        (groups::ACCOUNT_CATEGORY, record.account_category.as_str()),
        (groups::DIVISION, record.division.as_str()),
        (groups::SALES_ORG, record.sales_org.as_str()),
    ] {
        related_party.push(related(group, table.resolve(category, group, value)?));
    }
    let channel = match present(&record.distribution_channel) {
        Some(value) => table.resolve(category, groups::DISTRIBUTION_CHANNEL, value)?,
        None => table.default_code(category, groups::DISTRIBUTION_CHANNEL)?,
    };
    related_party.push(related(groups::DISTRIBUTION_CHANNEL, channel));

    Ok(CmPartyRequest {
        entity_category: record.entity_kind,
        party_type: record.party_type,
        external_reference: record.id.to_string(),
        party_id: None,
        name: record.name.clone(),
        identification: identification(record),
        contact_medium: record
            .contact_media()
            .into_iter()
            .map(|m| CmContactMedium {
                medium_type: m.medium_type,
                value: m.value,
            })
            .collect(),
        address: record
            .addresses()
            .into_iter()
            .map(|a| CmAddress {
                role: a.role,
                country: a.country,
                locality: a.locality,
                street: a.street,
                postal_code: a.postal_code,
            })
            .collect(),
        related_party,
    })
}

/// Request for CM's update call: the create body plus the CM party id.
pub fn build_update_request(
    record: &OnboardingRecord,
    table: &CodeTranslationTable,
) -> Result<CmPartyRequest, TranslationMiss> {
    let mut request = build_create_request(record, table)?;
    request.party_id = record.external_party_id.clone();
    Ok(request)
}

fn related(role: &str, code: &str) -> CmRelatedParty {
    CmRelatedParty {
        role: role.to_string(),
        id: code.to_string(),
    }
}

fn identification(record: &OnboardingRecord) -> Vec<CmIdentification> {
    [
        ("TAX_ID", &record.tax_id),
        ("REGISTRATION_NUMBER", &record.registration_number),
    ]
    .into_iter()
    .filter_map(|(kind, value)| {
        present(value).map(|v| CmIdentification {
            identification_type: kind.to_string(),
            identification_id: v.to_string(),
        })
    })
    .collect()
}
