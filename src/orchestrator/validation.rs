//! Mandatory-field and format checks run before a record goes anywhere.

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::OnboardingRecord;
use crate::record::model::present;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const PHONE_PATTERN: &str = r"^\+?[0-9][0-9 ()\-]{5,19}$";

/// One problem with one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub problem: String,
}

impl FieldIssue {
    fn new(field: &str, problem: &str) -> Self {
        Self {
            field: field.to_string(),
            problem: problem.to_string(),
        }
    }
}

/// A record failed validation. Never retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Record {record_id} failed validation: {}", summary(.issues))]
pub struct ValidationError {
    pub record_id: Uuid,
    pub issues: Vec<FieldIssue>,
}

fn summary(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} {}", i.field, i.problem))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compiled field rules.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    email: Regex,
    phone: Regex,
}

impl ValidationRules {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_patterns(EMAIL_PATTERN, PHONE_PATTERN)
    }

    pub fn with_patterns(email: &str, phone: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(email)?,
            phone: Regex::new(phone)?,
        })
    }

    /// Check mandatory fields and contact formats.
    pub fn validate(&self, record: &OnboardingRecord) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (field, value) in [
            ("name", &record.name),
            ("account_category", &record.account_category),
            ("division", &record.division),
            ("sales_org", &record.sales_org),
        ] {
            if value.trim().is_empty() {
                issues.push(FieldIssue::new(field, "is required"));
            }
        }

        if let Some(email) = present(&record.contact.email) {
            if !self.email.is_match(email) {
                issues.push(FieldIssue::new("contact.email", "is not a valid email address"));
            }
        }
        for (field, value) in [
            ("contact.mobile", &record.contact.mobile),
            ("contact.phone", &record.contact.phone),
            ("contact.fax", &record.contact.fax),
        ] {
            if let Some(number) = present(value) {
                if !self.phone.is_match(number) {
                    issues.push(FieldIssue::new(field, "is not a valid phone number"));
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                record_id: record.id,
                issues,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContactDetails, EntityKind, PartyType};

    fn rules() -> ValidationRules {
        ValidationRules::new().unwrap()
    }

    fn valid() -> OnboardingRecord {
        OnboardingRecord::new(EntityKind::Agent, PartyType::Standalone, "Acme")
            .with_classification("RETAIL", "MOBILE", "KE01")
    }

    #[test]
    fn complete_record_passes() {
        assert!(rules().validate(&valid()).is_ok());
    }

    #[test]
    fn missing_mandatory_fields_are_listed() {
        let r = OnboardingRecord::new(EntityKind::Customer, PartyType::Child, "  ")
            .with_classification("RETAIL", "", "KE01");
        let err = rules().validate(&r).unwrap_err();
        let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "division"]);
        assert_eq!(err.record_id, r.id);
        assert!(err.to_string().contains("division is required"));
    }

    #[test]
    fn contact_formats_are_checked() {
        let r = valid().with_contact(ContactDetails {
            mobile: Some("+254 711 000000".into()),
            phone: Some("call me".into()),
            fax: None,
            email: Some("not-an-email".into()),
        });
        let err = rules().validate(&r).unwrap_err();
        let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["contact.email", "contact.phone"]);
    }

    #[test]
    fn blank_optional_contacts_are_ignored() {
        let r = valid().with_contact(ContactDetails {
            email: Some("   ".into()),
            ..Default::default()
        });
        assert!(rules().validate(&r).is_ok());
    }
}
