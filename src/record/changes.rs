//! Detail changes requested by `update`, and field-level diffs for the audit trail.

use serde::{Deserialize, Serialize};

use super::model::{AddressDetails, OnboardingRecord};

/// Requested changes to a record's details.
///
/// `None` leaves a field alone. For optional fields an empty string clears
/// the value. Identity and lifecycle fields cannot be changed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fax: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<AddressDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_address: Option<AddressDetails>,
}

impl RecordChanges {
    /// Return a copy of `record` with these changes applied.
    pub fn apply_to(&self, record: &OnboardingRecord) -> OnboardingRecord {
        let mut next = record.clone();
        set_required(&mut next.name, &self.name);
        set_required(&mut next.account_category, &self.account_category);
        set_required(&mut next.division, &self.division);
        set_required(&mut next.sales_org, &self.sales_org);
        set_optional(&mut next.tax_id, &self.tax_id);
        set_optional(&mut next.registration_number, &self.registration_number);
        set_optional(&mut next.distribution_channel, &self.distribution_channel);
        set_optional(&mut next.contact.mobile, &self.mobile);
        set_optional(&mut next.contact.phone, &self.phone);
        set_optional(&mut next.contact.fax, &self.fax);
        set_optional(&mut next.contact.email, &self.email);
        if let Some(address) = &self.billing_address {
            next.billing_address = address.clone();
        }
        if let Some(address) = &self.installation_address {
            next.installation_address = address.clone();
        }
        next
    }
}

fn set_required(target: &mut String, change: &Option<String>) {
    if let Some(value) = change {
        *target = value.trim().to_string();
    }
}

fn set_optional(target: &mut Option<String>, change: &Option<String>) {
    if let Some(value) = change {
        let value = value.trim();
        *target = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Detail fields that differ between `before` and `after`, in a fixed order.
pub fn diff(before: &OnboardingRecord, after: &OnboardingRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field: &str, a: Option<&str>, b: Option<&str>| {
        if a != b {
            changes.push(FieldChange {
                field: field.to_string(),
                before: a.map(String::from),
                after: b.map(String::from),
            });
        }
    };

    push("name", Some(before.name.as_str()), Some(after.name.as_str()));
    push("tax_id", before.tax_id.as_deref(), after.tax_id.as_deref());
    push(
        "registration_number",
        before.registration_number.as_deref(),
        after.registration_number.as_deref(),
    );
    push(
        "account_category",
        Some(before.account_category.as_str()),
        Some(after.account_category.as_str()),
    );
    push("division", Some(before.division.as_str()), Some(after.division.as_str()));
    push("sales_org", Some(before.sales_org.as_str()), Some(after.sales_org.as_str()));
    push(
        "distribution_channel",
        before.distribution_channel.as_deref(),
        after.distribution_channel.as_deref(),
    );
    push(
        "contact.mobile",
        before.contact.mobile.as_deref(),
        after.contact.mobile.as_deref(),
    );
    push(
        "contact.phone",
        before.contact.phone.as_deref(),
        after.contact.phone.as_deref(),
    );
    push(
        "contact.fax",
        before.contact.fax.as_deref(),
        after.contact.fax.as_deref(),
    );
    push(
        "contact.email",
        before.contact.email.as_deref(),
        after.contact.email.as_deref(),
    );

    for (prefix, a, b) in [
        ("billing_address", &before.billing_address, &after.billing_address),
        (
            "installation_address",
            &before.installation_address,
            &after.installation_address,
        ),
    ] {
        push(
            &format!("{prefix}.street"),
            a.street.as_deref(),
            b.street.as_deref(),
        );
        push(
            &format!("{prefix}.locality"),
            a.locality.as_deref(),
            b.locality.as_deref(),
        );
        push(
            &format!("{prefix}.postal_code"),
            a.postal_code.as_deref(),
            b.postal_code.as_deref(),
        );
        push(
            &format!("{prefix}.country"),
            a.country.as_deref(),
            b.country.as_deref(),
        );
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::model::{ContactDetails, EntityKind, PartyType};

    fn record() -> OnboardingRecord {
        OnboardingRecord::new(EntityKind::Customer, PartyType::Standalone, "Jane Doe")
            .with_classification("RETAIL", "MOBILE", "KE01")
            .with_contact(ContactDetails {
                email: Some("jane@example.test".into()),
                ..Default::default()
            })
    }

    #[test]
    fn empty_changes_produce_no_diff() {
        let before = record();
        let after = RecordChanges::default().apply_to(&before);
        assert_eq!(before, after);
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn diff_lists_exactly_changed_fields() {
        let before = record();
        let changes = RecordChanges {
            name: Some("Jane A. Doe".into()),
            mobile: Some("0722000000".into()),
            email: Some(String::new()),
            ..Default::default()
        };
        let after = changes.apply_to(&before);
        let fields: Vec<_> = diff(&before, &after).into_iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["name", "contact.mobile", "contact.email"]);
        assert!(after.contact.email.is_none());
    }

    #[test]
    fn setting_same_value_is_not_a_change() {
        let before = record();
        let changes = RecordChanges {
            division: Some("MOBILE".into()),
            ..Default::default()
        };
        assert!(diff(&before, &changes.apply_to(&before)).is_empty());
    }

    #[test]
    fn address_changes_are_flattened() {
        let before = record();
        let changes = RecordChanges {
            billing_address: Some(AddressDetails {
                country: Some("KE".into()),
                locality: Some("Nairobi".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let d = diff(&before, &changes.apply_to(&before));
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].field, "billing_address.locality");
        assert_eq!(d[1].field, "billing_address.country");
        assert_eq!(d[1].after.as_deref(), Some("KE"));
        assert!(d[1].before.is_none());
    }

    #[test]
    fn changes_never_touch_lifecycle_fields() {
        let before = record();
        let changes = RecordChanges {
            name: Some("Other".into()),
            ..Default::default()
        };
        let after = changes.apply_to(&before);
        assert_eq!(after.id, before.id);
        assert_eq!(after.stage, before.stage);
        assert_eq!(after.party_type, before.party_type);
        assert_eq!(after.entity_kind, before.entity_kind);
        assert_eq!(after.external_party_id, before.external_party_id);
    }
}
